//! Sandbox entity and lifecycle transition rules.
//!
//! # Design
//!
//! The `Sandbox` row is the sole persisted entity of the broker. Every
//! lifecycle change is expressed as a [`SandboxEvent`] applied via
//! [`Sandbox::apply`], which enforces the legal-transition table below.
//! Illegal transitions return [`TransitionError`]; callers surface that as a
//! wrong-state refusal. `apply` never touches `version` — the optimistic
//! concurrency bump belongs to the store's conditional write, so a mutated
//! copy can be handed to `update_if` alongside the prior version.
//!
//! # State diagram
//!
//! ```text
//!   sync observes new ──────────────▶ available
//!   available ── Allocate ─────────▶ allocated
//!   allocated ── MarkForDeletion ──▶ pending_deletion
//!   allocated ── ExpireLease ──────▶ available
//!   pending_deletion ── DeletionTimedOut ─▶ deletion_failed
//!   pending_deletion / deletion_failed ── upstream gone (sync) ─▶ removed
//!   any ── ObserveUpstream ────────▶ same status, refreshed name/last_seen
//! ```
//!
//! Row removal is not a transition: the reconciler deletes rows through the
//! store's conditional delete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// SandboxStatus
// ---------------------------------------------------------------------------

/// All valid states a sandbox row can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    /// In the pool and free to be claimed by a track.
    Available,
    /// Exclusively leased to a track until `expires_at`.
    Allocated,
    /// The owning track is done; awaiting upstream account deletion.
    PendingDeletion,
    /// Upstream deletion did not complete within the timeout; operator action required.
    DeletionFailed,
    /// Local row no longer backed by a live upstream account.
    Stale,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Available => "available",
            SandboxStatus::Allocated => "allocated",
            SandboxStatus::PendingDeletion => "pending_deletion",
            SandboxStatus::DeletionFailed => "deletion_failed",
            SandboxStatus::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(SandboxStatus::Available),
            "allocated" => Some(SandboxStatus::Allocated),
            "pending_deletion" => Some(SandboxStatus::PendingDeletion),
            "deletion_failed" => Some(SandboxStatus::DeletionFailed),
            "stale" => Some(SandboxStatus::Stale),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SandboxEvent
// ---------------------------------------------------------------------------

/// Events that drive state transitions on a [`Sandbox`].
///
/// Timestamps are epoch seconds supplied by the caller so a whole batch
/// (e.g. one reconciler tick) shares a single `now`.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxEvent {
    /// A track claims the sandbox for `lease_seconds`.
    Allocate {
        track_id: String,
        now: i64,
        lease_seconds: i64,
    },
    /// The owning track releases the sandbox for upstream deletion.
    MarkForDeletion { now: i64 },
    /// The lease ran out; the cleanup reclaimer returns the row to the pool.
    ExpireLease,
    /// Upstream deletion did not complete within the deletion timeout.
    DeletionTimedOut,
    /// The sync reconciler saw the backing account upstream.
    /// Refreshes `name` and `last_seen_at` only; never touches status or
    /// allocation fields.
    ObserveUpstream { name: String, now: i64 },
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied in the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    /// The status the row was in when the illegal event arrived.
    pub from: SandboxStatus,
    /// Debug string of the event that was rejected.
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal sandbox transition: {} + {}",
            self.from.as_str(),
            self.event
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// The persisted sandbox row.
///
/// Invariants (held after every successful [`apply`][Sandbox::apply]):
/// - `status == Allocated` ⇔ `allocated_to_track`, `allocated_at` and
///   `expires_at` are all set.
/// - `status ∈ {PendingDeletion, DeletionFailed}` ⇒ `deletion_requested_at`
///   is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sandbox {
    /// Primary identity, immutable.
    pub sandbox_id: Uuid,
    /// Human-readable name, refreshed from upstream.
    pub name: String,
    /// Upstream account identifier; unique across non-stale rows.
    pub external_id: String,
    pub status: SandboxStatus,
    pub allocated_to_track: Option<String>,
    /// Epoch seconds of the allocation, if allocated.
    pub allocated_at: Option<i64>,
    /// `allocated_at + lease_seconds`, if allocated.
    pub expires_at: Option<i64>,
    /// Epoch seconds when deletion was requested, for the deletion statuses.
    pub deletion_requested_at: Option<i64>,
    /// Epoch seconds of the last sync observation.
    pub last_seen_at: i64,
    /// Optimistic-concurrency guard; bumped by the store on every write.
    pub version: i64,
}

impl Sandbox {
    /// A fresh pool row as the sync reconciler creates it for a newly
    /// observed upstream account.
    pub fn new_available(name: impl Into<String>, external_id: impl Into<String>, now: i64) -> Self {
        Self {
            sandbox_id: Uuid::new_v4(),
            name: name.into(),
            external_id: external_id.into(),
            status: SandboxStatus::Available,
            allocated_to_track: None,
            allocated_at: None,
            expires_at: None,
            deletion_requested_at: None,
            last_seen_at: now,
            version: 1,
        }
    }

    /// True when an allocated row's lease has run out at `now`.
    /// Rows in any other status never expire.
    pub fn lease_expired(&self, now: i64) -> bool {
        self.status == SandboxStatus::Allocated
            && self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    /// Field-level consistency check for the allocation invariant.
    pub fn allocation_fields_consistent(&self) -> bool {
        let all_set = self.allocated_to_track.is_some()
            && self.allocated_at.is_some()
            && self.expires_at.is_some();
        match self.status {
            SandboxStatus::Allocated => all_set,
            _ => {
                self.allocated_to_track.is_none()
                    && self.allocated_at.is_none()
                    && self.expires_at.is_none()
            }
        }
    }

    /// Apply a lifecycle event to this row.
    ///
    /// # Errors
    /// Returns [`TransitionError`] when the event is not legal in the current
    /// status. The row is left unchanged on error.
    pub fn apply(&mut self, event: &SandboxEvent) -> Result<(), TransitionError> {
        use SandboxEvent::*;
        use SandboxStatus::*;

        match (self.status, event) {
            (
                Available,
                Allocate {
                    track_id,
                    now,
                    lease_seconds,
                },
            ) => {
                self.status = Allocated;
                self.allocated_to_track = Some(track_id.clone());
                self.allocated_at = Some(*now);
                self.expires_at = Some(now + lease_seconds);
            }

            (Allocated, MarkForDeletion { now }) => {
                self.status = PendingDeletion;
                self.deletion_requested_at = Some(*now);
                self.allocated_to_track = None;
                self.allocated_at = None;
                self.expires_at = None;
            }

            (Allocated, ExpireLease) => {
                self.status = Available;
                self.allocated_to_track = None;
                self.allocated_at = None;
                self.expires_at = None;
            }

            (PendingDeletion, DeletionTimedOut) => {
                self.status = DeletionFailed;
            }

            // Sync refresh is legal in every status and never touches the
            // lifecycle fields.
            (_, ObserveUpstream { name, now }) => {
                self.name = name.clone();
                self.last_seen_at = *now;
            }

            (status, ev) => {
                return Err(TransitionError {
                    from: status,
                    event: format!("{ev:?}"),
                });
            }
        }

        Ok(())
    }
}

/// Current wall-clock time as epoch seconds.
pub fn epoch_now() -> i64 {
    Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
