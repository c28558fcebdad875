//! Broker metrics.
//!
//! One struct registers every counter and gauge against the registry the
//! daemon exposes on `/metrics`. Handles are cheap clones; the allocator and
//! both background jobs share one `Arc<BrokerMetrics>`.

use prometheus::{IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};

pub struct BrokerMetrics {
    /// Allocation outcomes, labeled `outcome` ∈ created | idempotent | no_capacity.
    pub allocations_total: IntCounterVec,
    /// Candidate claim attempts lost to a concurrent writer.
    pub allocation_conflicts_total: IntCounter,
    pub mark_for_deletion_total: IntCounter,

    pub sync_runs_total: IntCounter,
    /// Ticks skipped because the previous tick was still running.
    pub sync_skipped_total: IntCounter,
    /// Upstream fetch failures; the tick mutates nothing when this fires.
    pub sync_failures_total: IntCounter,
    pub sync_rows_inserted_total: IntCounter,
    pub sync_rows_removed_total: IntCounter,
    /// Per-row store errors the reconciler swallowed and skipped.
    pub sync_row_errors_total: IntCounter,
    /// Allocated rows whose upstream account disappeared mid-lease.
    pub sync_orphaned_allocated_total: IntCounter,

    pub cleanup_runs_total: IntCounter,
    pub cleanup_leases_reclaimed_total: IntCounter,
    pub cleanup_deletions_promoted_total: IntCounter,

    /// Pool composition by status, refreshed by each sync tick.
    pub pool_rows: IntGaugeVec,
}

impl BrokerMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let allocations_total = IntCounterVec::new(
            Opts::new("sbx_allocations_total", "Allocation outcomes by kind"),
            &["outcome"],
        )?;
        let allocation_conflicts_total = IntCounter::new(
            "sbx_allocation_conflicts_total",
            "Candidate claims lost to concurrent writers",
        )?;
        let mark_for_deletion_total = IntCounter::new(
            "sbx_mark_for_deletion_total",
            "Sandboxes released for deletion by their owning track",
        )?;
        let sync_runs_total =
            IntCounter::new("sbx_sync_runs_total", "Completed sync reconciler ticks")?;
        let sync_skipped_total = IntCounter::new(
            "sbx_sync_skipped_total",
            "Sync ticks skipped while a previous tick was running",
        )?;
        let sync_failures_total = IntCounter::new(
            "sbx_sync_failures_total",
            "Sync ticks aborted on upstream fetch failure",
        )?;
        let sync_rows_inserted_total = IntCounter::new(
            "sbx_sync_rows_inserted_total",
            "Rows created for newly observed upstream accounts",
        )?;
        let sync_rows_removed_total = IntCounter::new(
            "sbx_sync_rows_removed_total",
            "Rows removed after their upstream account disappeared",
        )?;
        let sync_row_errors_total = IntCounter::new(
            "sbx_sync_row_errors_total",
            "Per-row reconciliation errors skipped by the sync job",
        )?;
        let sync_orphaned_allocated_total = IntCounter::new(
            "sbx_sync_orphaned_allocated_total",
            "Allocated rows whose upstream account disappeared mid-lease",
        )?;
        let cleanup_runs_total =
            IntCounter::new("sbx_cleanup_runs_total", "Completed cleanup reclaimer ticks")?;
        let cleanup_leases_reclaimed_total = IntCounter::new(
            "sbx_cleanup_leases_reclaimed_total",
            "Expired leases returned to the pool",
        )?;
        let cleanup_deletions_promoted_total = IntCounter::new(
            "sbx_cleanup_deletions_promoted_total",
            "Stuck pending deletions promoted to deletion_failed",
        )?;
        let pool_rows = IntGaugeVec::new(
            Opts::new("sbx_pool_rows", "Sandbox pool composition by status"),
            &["status"],
        )?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(allocations_total.clone()),
            Box::new(allocation_conflicts_total.clone()),
            Box::new(mark_for_deletion_total.clone()),
            Box::new(sync_runs_total.clone()),
            Box::new(sync_skipped_total.clone()),
            Box::new(sync_failures_total.clone()),
            Box::new(sync_rows_inserted_total.clone()),
            Box::new(sync_rows_removed_total.clone()),
            Box::new(sync_row_errors_total.clone()),
            Box::new(sync_orphaned_allocated_total.clone()),
            Box::new(cleanup_runs_total.clone()),
            Box::new(cleanup_leases_reclaimed_total.clone()),
            Box::new(cleanup_deletions_promoted_total.clone()),
            Box::new(pool_rows.clone()),
        ];
        for collector in collectors {
            registry.register(collector)?;
        }

        Ok(Self {
            allocations_total,
            allocation_conflicts_total,
            mark_for_deletion_total,
            sync_runs_total,
            sync_skipped_total,
            sync_failures_total,
            sync_rows_inserted_total,
            sync_rows_removed_total,
            sync_row_errors_total,
            sync_orphaned_allocated_total,
            cleanup_runs_total,
            cleanup_leases_reclaimed_total,
            cleanup_deletions_promoted_total,
            pool_rows,
        })
    }
}
