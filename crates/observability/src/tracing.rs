//! Tracing/logging initialization.
//!
//! Both entry points read the filter from `RUST_LOG` (default `info`) and are
//! safe to call repeatedly: the first successful install wins.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// JSON logs with timestamps, for services and the sweep runner.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Human-readable logs routed through the test harness' capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_harmless() {
        init_for_tests();
        init_for_tests();
        init();
        tracing::info!(component = "observability", "still logging");
    }
}
