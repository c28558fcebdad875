//! Sync reconciler.
//!
//! Aligns the local pool with the provider's account inventory. One tick:
//! fetch the upstream list, walk every local row page by page, then insert
//! rows for accounts seen upstream but unknown locally. An upstream fetch
//! failure aborts the tick before any write. Per-row store errors are
//! counted and skipped; the reconciler's conditional writes can never
//! clobber an in-flight allocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sbx_schemas::{epoch_now, Sandbox, SandboxEvent, SandboxStatus};
use sbx_store::{SandboxPatch, SandboxStore, StoreError};
use sbx_upstream::{UpstreamAccount, UpstreamInventory};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::{BrokerError, BrokerMetrics};

const SYNC_PAGE_SIZE: i64 = 100;

/// Counts from one completed reconciler tick.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    /// New rows created for accounts first seen upstream.
    pub inserted: u64,
    /// Rows removed because their upstream account disappeared.
    pub removed: u64,
    /// Rows whose `last_seen_at` (and possibly `name`) was refreshed.
    pub refreshed: u64,
    /// Subset of `removed` that were `pending_deletion` — the upstream
    /// deletion completed.
    pub deleted_upstream: u64,
    /// Allocated rows left in place although upstream no longer lists them.
    pub orphaned_allocated: u64,
    /// Per-row store errors skipped during the tick.
    pub row_errors: u64,
}

pub struct SyncReconciler {
    store: Arc<dyn SandboxStore>,
    upstream: Arc<dyn UpstreamInventory>,
    metrics: Arc<BrokerMetrics>,
    /// Process-local single-flight guard shared by the timer tick and the
    /// admin trigger.
    guard: Mutex<()>,
}

impl SyncReconciler {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        upstream: Arc<dyn UpstreamInventory>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        Self {
            store,
            upstream,
            metrics,
            guard: Mutex::new(()),
        }
    }

    /// Run one tick, waiting for any in-flight tick to finish first.
    /// This is the admin-trigger path.
    pub async fn run_once(&self) -> Result<SyncReport, BrokerError> {
        let _flight = self.guard.lock().await;
        self.tick().await
    }

    /// Run one tick only if none is in flight; the timer path. A tick that
    /// fires while the previous one is still running is skipped, not queued.
    pub async fn run_if_idle(&self) -> Option<Result<SyncReport, BrokerError>> {
        match self.guard.try_lock() {
            Ok(_flight) => Some(self.tick().await),
            Err(_) => {
                self.metrics.sync_skipped_total.inc();
                None
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> Result<SyncReport, BrokerError> {
        let accounts = match self.upstream.list_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                self.metrics.sync_failures_total.inc();
                warn!(error = %e, "upstream fetch failed; tick aborted without writes");
                return Err(e.into());
            }
        };

        let now = epoch_now();
        let upstream: HashMap<String, UpstreamAccount> = accounts
            .into_iter()
            .map(|a| (a.external_id.clone(), a))
            .collect();

        let mut report = SyncReport::default();
        let mut status_counts: HashMap<SandboxStatus, i64> = HashMap::new();
        let mut seen_external: HashSet<String> = HashSet::new();

        // Pass 1: walk every local row.
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .paged_scan(None, cursor.as_deref(), SYNC_PAGE_SIZE)
                .await?;
            for row in page.items {
                seen_external.insert(row.external_id.clone());
                match upstream.get(&row.external_id) {
                    Some(account) => {
                        *status_counts.entry(row.status).or_default() += 1;
                        self.refresh_row(&row, account, now, &mut report).await;
                    }
                    None => self.prune_row(&row, &mut report, &mut status_counts).await,
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // Pass 2: insert accounts not present locally.
        for (external_id, account) in &upstream {
            if seen_external.contains(external_id) {
                continue;
            }
            let row = Sandbox::new_available(account.name.clone(), external_id.clone(), now);
            match self.store.put_if_absent(&row).await {
                Ok(()) => {
                    report.inserted += 1;
                    *status_counts.entry(SandboxStatus::Available).or_default() += 1;
                }
                // Another writer inserted the account first; the goal is met.
                Err(StoreError::Conflict) => {}
                Err(e) => {
                    report.row_errors += 1;
                    warn!(external_id = %external_id, error = %e, "insert failed; skipping row");
                }
            }
        }

        for (status, count) in &status_counts {
            self.metrics
                .pool_rows
                .with_label_values(&[status.as_str()])
                .set(*count);
        }

        self.metrics.sync_runs_total.inc();
        self.metrics.sync_rows_inserted_total.inc_by(report.inserted);
        self.metrics.sync_rows_removed_total.inc_by(report.removed);
        self.metrics.sync_row_errors_total.inc_by(report.row_errors);
        self.metrics
            .sync_orphaned_allocated_total
            .inc_by(report.orphaned_allocated);

        info!(
            inserted = report.inserted,
            removed = report.removed,
            refreshed = report.refreshed,
            deleted_upstream = report.deleted_upstream,
            orphaned_allocated = report.orphaned_allocated,
            row_errors = report.row_errors,
            "sync tick complete"
        );
        Ok(report)
    }

    /// The account is still upstream: refresh the name and observation time,
    /// leaving status and allocation fields alone.
    async fn refresh_row(
        &self,
        row: &Sandbox,
        account: &UpstreamAccount,
        now: i64,
        report: &mut SyncReport,
    ) {
        let mut next = row.clone();
        let event = SandboxEvent::ObserveUpstream {
            name: account.name.clone(),
            now,
        };
        if next.apply(&event).is_err() {
            report.row_errors += 1;
            return;
        }
        match self
            .store
            .update_if(row.sandbox_id, row.version, &SandboxPatch::of(&next))
            .await
        {
            Ok(_) => report.refreshed += 1,
            // An allocator or the reclaimer won the row this tick; the next
            // tick will refresh it.
            Err(StoreError::VersionConflict) | Err(StoreError::NotFound) => {
                report.row_errors += 1;
            }
            Err(e) => {
                report.row_errors += 1;
                warn!(sandbox_id = %row.sandbox_id, error = %e, "refresh failed; skipping row");
            }
        }
    }

    /// The account disappeared upstream: remove reclaimable rows, keep
    /// leased ones.
    async fn prune_row(
        &self,
        row: &Sandbox,
        report: &mut SyncReport,
        status_counts: &mut HashMap<SandboxStatus, i64>,
    ) {
        match row.status {
            SandboxStatus::Allocated => {
                // A track is mid-lease on an account that no longer exists.
                // Leave the row; lease expiry will reclaim it.
                warn!(
                    sandbox_id = %row.sandbox_id,
                    external_id = %row.external_id,
                    track = row.allocated_to_track.as_deref().unwrap_or(""),
                    "upstream account disappeared mid-lease"
                );
                report.orphaned_allocated += 1;
                *status_counts.entry(row.status).or_default() += 1;
            }
            SandboxStatus::Available
            | SandboxStatus::DeletionFailed
            | SandboxStatus::PendingDeletion
            | SandboxStatus::Stale => {
                match self.store.delete_if(row.sandbox_id, row.version).await {
                    Ok(()) => {
                        report.removed += 1;
                        if row.status == SandboxStatus::PendingDeletion {
                            report.deleted_upstream += 1;
                        }
                    }
                    Err(StoreError::VersionConflict) | Err(StoreError::NotFound) => {
                        report.row_errors += 1;
                        *status_counts.entry(row.status).or_default() += 1;
                    }
                    Err(e) => {
                        report.row_errors += 1;
                        *status_counts.entry(row.status).or_default() += 1;
                        warn!(sandbox_id = %row.sandbox_id, error = %e, "prune failed; skipping row");
                    }
                }
            }
        }
    }
}
