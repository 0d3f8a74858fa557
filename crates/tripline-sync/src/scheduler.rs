//! # Sync Scheduler
//!
//! The periodic background driver: ticks, runs a sync pass, then a
//! reconciliation pass, then retention cleanup.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Scheduler::run()                                    │
//! │                                                                         │
//! │  interval(tick_interval) ── MissedTickBehavior::Delay                  │
//! │       │   (a slow pass delays the next tick instead of bursting)       │
//! │       ▼                                                                 │
//! │  tokio::select! {                                                       │
//! │      tick      → sync pass → reconcile pass → retention cleanup        │
//! │      shutdown  → drain and exit                                        │
//! │  }                                                                      │
//! │                                                                         │
//! │  Per-device overlap is already prevented by the sync-state CAS         │
//! │  claim, so an overlapping manual run is safe.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::orchestrator::{SyncOrchestrator, SyncRequest};
use crate::reconcile::{ReconcileEngine, ReconcileRequest};
use crate::vendor::VendorApi;
use tripline_db::Database;

/// Handle for stopping a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the loop to drain.
    pub async fn shutdown(self) {
        info!("Shutting down scheduler");
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.join.await;
    }
}

/// Periodic sync driver.
pub struct Scheduler<V: VendorApi + 'static> {
    db: Database,
    orchestrator: Arc<SyncOrchestrator<V>>,
    reconcile: Arc<ReconcileEngine>,
    config: SyncConfig,
}

impl<V: VendorApi + 'static> Scheduler<V> {
    pub fn new(
        db: Database,
        orchestrator: Arc<SyncOrchestrator<V>>,
        reconcile: Arc<ReconcileEngine>,
        config: SyncConfig,
    ) -> Self {
        Scheduler {
            db,
            orchestrator,
            reconcile,
            config,
        }
    }

    /// Spawns the scheduler loop as a background task.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));

        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            tick_secs = self.config.sync.tick_interval_secs,
            "Scheduler starting"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sync.tick_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Scheduler stopped");
                    break;
                }
            }
        }
    }

    /// One full pass: sync, reconcile, retention.
    async fn tick(&self) {
        match self.orchestrator.run(SyncRequest::default()).await {
            Ok(report) => {
                if !report.errors.is_empty() {
                    warn!(errors = report.errors.len(), "Sync pass had device failures");
                }
            }
            Err(e) => error!(error = %e, "Sync pass failed"),
        }

        // Sweep the same window the sync pass can touch
        let now = Utc::now();
        let sweep = ReconcileRequest::sweep(
            now - ChronoDuration::days(self.config.sync.lookback_days),
            now,
        );
        if let Err(e) = self.reconcile.run(sweep).await {
            error!(error = %e, "Reconciliation pass failed");
        }

        if self.config.sync.retention_days > 0 {
            let cutoff = Utc::now() - ChronoDuration::days(self.config.sync.retention_days);
            match self.db.positions().delete_older_than(cutoff).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Retention cleanup removed old telemetry"),
                Err(e) => error!(error = %e, "Retention cleanup failed"),
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncResult;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::Value;
    use tripline_db::DbConfig;

    /// Vendor with no devices and no data: ticks become no-ops.
    struct EmptyVendor;

    #[async_trait]
    impl VendorApi for EmptyVendor {
        async fn latest_position(&self, _id: &str) -> SyncResult<Option<Value>> {
            Ok(None)
        }

        async fn position_history(
            &self,
            _id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> SyncResult<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_spawn_tick_and_shutdown() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = SyncConfig::default();
        config.sync.tick_interval_secs = 1;

        let orchestrator = Arc::new(SyncOrchestrator::new(
            db.clone(),
            Arc::new(EmptyVendor),
            config.clone(),
        ));
        let reconcile = Arc::new(ReconcileEngine::new(db.clone(), config.clone()));

        let handle = Scheduler::new(db, orchestrator, reconcile, config).spawn();

        // First tick fires immediately; give it a moment to run
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
    }
}
