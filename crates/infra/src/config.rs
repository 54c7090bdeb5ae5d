//! Engine configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockflow_core::{ReadinessComparison, ReadinessOrder};
use stockflow_products::SearchLimits;

pub const ENV_READINESS_COMPARISON: &str = "STOCKFLOW_READINESS_COMPARISON";
pub const ENV_MAX_COMBINATIONS: &str = "STOCKFLOW_MAX_COMBINATIONS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "STOCKFLOW_SWEEP_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How day-count readiness compares against dated readiness.
    pub readiness_comparison: ReadinessComparison,
    /// Search nodes one unit recomputation may evaluate.
    pub max_combinations: usize,
    /// Period of the expired-override sweep.
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            readiness_comparison: ReadinessComparison::Lexical,
            max_combinations: SearchLimits::default().max_nodes,
            sweep_interval_secs: 3600,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STOCKFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`EngineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_READINESS_COMPARISON) {
            config.readiness_comparison = raw.trim().parse::<ReadinessComparison>().map_err(|e| ConfigError::Invalid {
                key: ENV_READINESS_COMPARISON,
                value: raw.clone(),
                reason: format!("{e}"),
            })?;
        }
        if let Some(raw) = lookup(ENV_MAX_COMBINATIONS) {
            config.max_combinations = parse_positive(ENV_MAX_COMBINATIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            config.sweep_interval_secs = parse_positive(ENV_SWEEP_INTERVAL_SECS, &raw)?;
        }

        Ok(config)
    }

    pub fn search_limits(&self) -> SearchLimits {
        SearchLimits {
            max_nodes: self.max_combinations,
        }
    }

    pub fn readiness_order(&self, now: DateTime<Utc>) -> ReadinessOrder {
        ReadinessOrder::new(self.readiness_comparison, now)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_positive<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason,
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| invalid(e.to_string()))?;
    if value <= T::default() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(value)
}
