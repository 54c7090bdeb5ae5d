//! Expired unlimited-stock sweep and its periodic runner.
//!
//! Items whose unlimited-stock date override lies in the past lose the
//! override through the ordinary command path, which recomputes every
//! dependent unit. Running the sweep twice is harmless: the second run finds
//! nothing to clear.

use std::collections::BTreeSet;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use stockflow_core::{ProductId, StockItemId};
use stockflow_events::{EventBus, EventEnvelope};
use stockflow_inventory::{ClearExpiredUnlimitedStock, StockItemCommand};

use crate::error::ServiceError;
use crate::service::AvailabilityService;
use crate::store::AvailabilityStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cleared_items: Vec<StockItemId>,
    pub affected_units: Vec<ProductId>,
    /// Items skipped after a concurrent change; the next run retries them.
    pub skipped: usize,
}

impl<S, B> AvailabilityService<S, B>
where
    S: AvailabilityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Clear every unlimited-stock date override older than `now`.
    #[instrument(skip(self))]
    pub fn stop_expired_unlimited_stock_dates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ServiceError> {
        let candidates = self.store().items_with_unlimited_date_before(now)?;
        let mut report = SweepReport::default();
        let mut affected = BTreeSet::new();

        for item_id in candidates {
            let command =
                StockItemCommand::ClearExpiredUnlimitedStock(ClearExpiredUnlimitedStock { item_id, now });
            match self.dispatch_item_at(command, now) {
                Ok(outcome) if outcome.is_unchanged() => {}
                Ok(outcome) => {
                    report.cleared_items.push(item_id);
                    affected.extend(outcome.affected_units);
                }
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    warn!(item_id = %item_id, error = %e, "skipping item in expiry sweep");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        report.affected_units = affected.into_iter().collect();
        info!(
            cleared = report.cleared_items.len(),
            affected_units = report.affected_units.len(),
            skipped = report.skipped,
            "expiry sweep finished"
        );
        Ok(report)
    }
}

/// Sweep runner statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub runs: u64,
    pub items_cleared: u64,
    pub units_recomputed: u64,
    pub failures: u64,
}

/// Handle to a running sweep thread.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweepStats>>,
}

impl SweepHandle {
    /// Stop the runner and wait for an in-flight sweep to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweepStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Runs the expiry sweep on a background thread: once at start, then every
/// `interval`.
pub struct SweepScheduler;

impl SweepScheduler {
    pub fn spawn<S, B>(
        service: Arc<AvailabilityService<S, B>>,
        interval: Duration,
    ) -> io::Result<SweepHandle>
    where
        S: AvailabilityStore + 'static,
        B: EventBus<EventEnvelope<JsonValue>> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweepStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name("expiry-sweep".to_string())
            .spawn(move || sweep_loop(&service, interval, &shutdown_rx, &stats_clone))?;

        Ok(SweepHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweep_loop<S, B>(
    service: &AvailabilityService<S, B>,
    interval: Duration,
    shutdown_rx: &mpsc::Receiver<()>,
    stats: &Mutex<SweepStats>,
) where
    S: AvailabilityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    info!(interval_secs = interval.as_secs(), "expiry sweep started");

    loop {
        let result = service.stop_expired_unlimited_stock_dates(Utc::now());
        {
            let mut s = stats.lock().unwrap_or_else(PoisonError::into_inner);
            s.runs += 1;
            match &result {
                Ok(report) => {
                    s.items_cleared += report.cleared_items.len() as u64;
                    s.units_recomputed += report.affected_units.len() as u64;
                }
                Err(_) => s.failures += 1,
            }
        }
        if let Err(e) = result {
            error!(error = %e, "expiry sweep failed");
        }

        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("expiry sweep stopped");
}
