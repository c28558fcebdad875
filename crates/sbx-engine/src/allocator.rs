//! The k-candidates allocator.
//!
//! Allocation never takes a lock. Each attempt reads up to K `available`
//! candidates from the status index, permutes them, and races conditional
//! writes until one sticks. K bounds the store operations per request;
//! the random permutation spreads concurrent allocators across the candidate
//! set so they collide far less than they would walking it in order.

use std::sync::Arc;

use rand::seq::SliceRandom;
use sbx_schemas::{epoch_now, Sandbox, SandboxEvent, SandboxStatus};
use sbx_store::{SandboxPatch, SandboxStore, StoreError};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{BrokerError, BrokerMetrics};

/// Upper bound on the idempotency probe over allocated rows. The status
/// index carries no track attribute, so the probe scans and filters.
const IDEMPOTENCY_PROBE_LIMIT: i64 = 1_000;

/// Re-read attempts for `mark_for_deletion` when a concurrent writer (the
/// sync refresh, typically) moves the version between read and write.
const MARK_RETRY_LIMIT: u32 = 5;

/// Result of a successful allocation.
#[derive(Debug)]
pub enum AllocateOutcome {
    /// First-time allocation for this track (HTTP 201).
    Created(Sandbox),
    /// The track already held a sandbox; returned unchanged (HTTP 200).
    Existing(Sandbox),
}

impl AllocateOutcome {
    pub fn sandbox(&self) -> &Sandbox {
        match self {
            AllocateOutcome::Created(s) | AllocateOutcome::Existing(s) => s,
        }
    }
}

pub struct Allocator {
    store: Arc<dyn SandboxStore>,
    metrics: Arc<BrokerMetrics>,
    k_candidates: usize,
    lease_seconds: i64,
}

impl Allocator {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        metrics: Arc<BrokerMetrics>,
        k_candidates: usize,
        lease_seconds: i64,
    ) -> Self {
        Self {
            store,
            metrics,
            k_candidates,
            lease_seconds,
        }
    }

    /// Allocate a sandbox to `track_id`.
    ///
    /// Idempotent per track: a track that already holds an `allocated` row
    /// gets that row back as [`AllocateOutcome::Existing`]. The probe reads
    /// the status index, which may lag; the worst case is a brief double
    /// allocation, which mark-for-deletion and lease expiry both absorb.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn allocate(&self, track_id: &str) -> Result<AllocateOutcome, BrokerError> {
        if let Some(held) = self.find_held(track_id).await? {
            self.metrics
                .allocations_total
                .with_label_values(&["idempotent"])
                .inc();
            debug!(sandbox_id = %held.sandbox_id, "track already holds a sandbox");
            return Ok(AllocateOutcome::Existing(held));
        }

        let mut candidates = self
            .store
            .scan_by_status(SandboxStatus::Available, self.k_candidates as i64)
            .await?;
        if candidates.is_empty() {
            self.metrics
                .allocations_total
                .with_label_values(&["no_capacity"])
                .inc();
            return Err(BrokerError::NoCapacity);
        }

        candidates.shuffle(&mut rand::thread_rng());

        let now = epoch_now();
        for candidate in &candidates {
            let mut next = candidate.clone();
            let event = SandboxEvent::Allocate {
                track_id: track_id.to_string(),
                now,
                lease_seconds: self.lease_seconds,
            };
            if next.apply(&event).is_err() {
                // Index staleness: the row moved out of `available` since the
                // scan. Treat like a lost claim.
                self.metrics.allocation_conflicts_total.inc();
                continue;
            }

            match self
                .store
                .update_if(candidate.sandbox_id, candidate.version, &SandboxPatch::of(&next))
                .await
            {
                Ok(claimed) => {
                    self.metrics
                        .allocations_total
                        .with_label_values(&["created"])
                        .inc();
                    debug!(sandbox_id = %claimed.sandbox_id, "claimed sandbox");
                    return Ok(AllocateOutcome::Created(claimed));
                }
                Err(StoreError::VersionConflict) | Err(StoreError::NotFound) => {
                    self.metrics.allocation_conflicts_total.inc();
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Every candidate was claimed out from under us.
        self.metrics
            .allocations_total
            .with_label_values(&["no_capacity"])
            .inc();
        warn!(candidates = candidates.len(), "claim loop exhausted");
        Err(BrokerError::NoCapacity)
    }

    /// Release an allocated sandbox into the deletion pipeline.
    ///
    /// Only the owning track may release; the transition clears the lease
    /// fields and stamps `deletion_requested_at`.
    #[instrument(skip(self), fields(sandbox_id = %sandbox_id, track_id = %track_id))]
    pub async fn mark_for_deletion(
        &self,
        sandbox_id: Uuid,
        track_id: &str,
    ) -> Result<Sandbox, BrokerError> {
        for _ in 0..MARK_RETRY_LIMIT {
            let row = self
                .store
                .get(sandbox_id)
                .await?
                .ok_or(BrokerError::NotFound)?;

            if row.status != SandboxStatus::Allocated {
                return Err(BrokerError::WrongState { status: row.status });
            }
            if row.allocated_to_track.as_deref() != Some(track_id) {
                return Err(BrokerError::NotOwned);
            }

            let mut next = row.clone();
            let event = SandboxEvent::MarkForDeletion { now: epoch_now() };
            next.apply(&event)
                .map_err(|e| BrokerError::WrongState { status: e.from })?;

            match self
                .store
                .update_if(sandbox_id, row.version, &SandboxPatch::of(&next))
                .await
            {
                Ok(updated) => {
                    self.metrics.mark_for_deletion_total.inc();
                    return Ok(updated);
                }
                // A concurrent writer (sync refresh, lease expiry) moved the
                // version; re-read and re-evaluate the preconditions.
                Err(StoreError::VersionConflict) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(BrokerError::StoreUnavailable(
            "persistent contention on mark-for-deletion".to_string(),
        ))
    }

    async fn find_held(&self, track_id: &str) -> Result<Option<Sandbox>, BrokerError> {
        let allocated = self
            .store
            .scan_by_status(SandboxStatus::Allocated, IDEMPOTENCY_PROBE_LIMIT)
            .await?;
        Ok(allocated
            .into_iter()
            .find(|s| s.allocated_to_track.as_deref() == Some(track_id)))
    }
}
