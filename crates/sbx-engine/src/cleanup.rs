//! Cleanup reclaimer.
//!
//! Two sweeps per tick: expired leases go back to `available`, and
//! `pending_deletion` rows older than the deletion timeout are promoted to
//! `deletion_failed` for operator attention. Every write is conditional and
//! every conflict is swallowed — a lost race means another writer already
//! handled the row.

use std::sync::Arc;

use sbx_schemas::{epoch_now, Sandbox, SandboxEvent, SandboxStatus};
use sbx_store::{SandboxPatch, SandboxStore};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{BrokerError, BrokerMetrics};

const SCAN_LIMIT: i64 = 500;

/// Counts from one completed reclaimer tick.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CleanupReport {
    pub leases_reclaimed: u64,
    pub deletions_promoted: u64,
}

pub struct CleanupReclaimer {
    store: Arc<dyn SandboxStore>,
    metrics: Arc<BrokerMetrics>,
    deletion_timeout_seconds: i64,
    guard: Mutex<()>,
}

impl CleanupReclaimer {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        metrics: Arc<BrokerMetrics>,
        deletion_timeout_seconds: i64,
    ) -> Self {
        Self {
            store,
            metrics,
            deletion_timeout_seconds,
            guard: Mutex::new(()),
        }
    }

    /// Run one tick, waiting for any in-flight tick to finish first.
    pub async fn run_once(&self) -> Result<CleanupReport, BrokerError> {
        let _flight = self.guard.lock().await;
        self.tick().await
    }

    /// Timer path: skip the tick entirely when the previous one still runs.
    pub async fn run_if_idle(&self) -> Option<Result<CleanupReport, BrokerError>> {
        match self.guard.try_lock() {
            Ok(_flight) => Some(self.tick().await),
            Err(_) => None,
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<CleanupReport, BrokerError> {
        let now = epoch_now();
        let mut report = CleanupReport::default();

        let allocated = self
            .store
            .scan_by_status(SandboxStatus::Allocated, SCAN_LIMIT)
            .await?;
        for row in allocated.iter().filter(|r| r.lease_expired(now)) {
            if self.transition(row, &SandboxEvent::ExpireLease).await {
                report.leases_reclaimed += 1;
                info!(
                    sandbox_id = %row.sandbox_id,
                    track = row.allocated_to_track.as_deref().unwrap_or(""),
                    "lease expired; sandbox returned to pool"
                );
            }
        }

        let pending = self
            .store
            .scan_by_status(SandboxStatus::PendingDeletion, SCAN_LIMIT)
            .await?;
        let deadline = now - self.deletion_timeout_seconds;
        for row in pending
            .iter()
            .filter(|r| r.deletion_requested_at.map(|t| t <= deadline).unwrap_or(false))
        {
            if self.transition(row, &SandboxEvent::DeletionTimedOut).await {
                report.deletions_promoted += 1;
                warn!(
                    sandbox_id = %row.sandbox_id,
                    external_id = %row.external_id,
                    "upstream deletion stuck; promoted to deletion_failed"
                );
            }
        }

        self.metrics.cleanup_runs_total.inc();
        self.metrics
            .cleanup_leases_reclaimed_total
            .inc_by(report.leases_reclaimed);
        self.metrics
            .cleanup_deletions_promoted_total
            .inc_by(report.deletions_promoted);
        Ok(report)
    }

    /// Apply `event` to `row` under the version guard. Returns whether the
    /// write stuck; conflicts mean the row was mutated concurrently and are
    /// deliberately ignored.
    async fn transition(&self, row: &Sandbox, event: &SandboxEvent) -> bool {
        let mut next = row.clone();
        if next.apply(event).is_err() {
            return false;
        }
        match self
            .store
            .update_if(row.sandbox_id, row.version, &SandboxPatch::of(&next))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(sandbox_id = %row.sandbox_id, error = %e, "reclaim write lost; skipping");
                false
            }
        }
    }
}
