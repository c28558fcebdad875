//! Sandbox store contract and adapters.
//!
//! The broker talks to its table exclusively through [`SandboxStore`], a thin
//! conditional-write key-value contract. Two adapters implement it:
//!
//! - [`MemoryStore`] — in-process `BTreeMap`; the test substrate and the
//!   daemon's storeless first-class mode.
//! - [`PgStore`] — one Postgres table with embedded migrations; every
//!   conditional write is a single guarded statement.
//!
//! Every successful `update_if` bumps `version` by exactly 1 and uses the
//! caller's expected version as the write precondition. Because any status
//! change bumps the version, an equal version also proves the status has not
//! moved — the version guard subsumes a separate status precondition.

use async_trait::async_trait;
use sbx_schemas::{Sandbox, SandboxStatus};
use uuid::Uuid;

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Failure modes of the store contract.
#[derive(Debug)]
pub enum StoreError {
    /// The keyed row does not exist.
    NotFound,
    /// `put_if_absent` hit an existing key or a live duplicate `external_id`.
    Conflict,
    /// The row exists but its version moved past the caller's precondition.
    VersionConflict,
    /// A paged-scan cursor that was never issued by this store.
    InvalidCursor(String),
    /// Transport-level failure talking to the backing table.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "sandbox row not found"),
            StoreError::Conflict => write!(f, "sandbox row already exists"),
            StoreError::VersionConflict => write!(f, "sandbox row version moved"),
            StoreError::InvalidCursor(c) => write!(f, "invalid scan cursor: {c}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// SandboxPatch
// ---------------------------------------------------------------------------

/// The full mutable payload of a row, written atomically by `update_if`.
///
/// Identity (`sandbox_id`, `external_id`) and `version` are not patchable:
/// identity is immutable and the version bump belongs to the store. Build a
/// patch by applying a `SandboxEvent` to a copy of the current row and
/// capturing it with [`SandboxPatch::of`].
#[derive(Debug, Clone)]
pub struct SandboxPatch {
    pub name: String,
    pub status: SandboxStatus,
    pub allocated_to_track: Option<String>,
    pub allocated_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub deletion_requested_at: Option<i64>,
    pub last_seen_at: i64,
}

impl SandboxPatch {
    pub fn of(row: &Sandbox) -> Self {
        Self {
            name: row.name.clone(),
            status: row.status,
            allocated_to_track: row.allocated_to_track.clone(),
            allocated_at: row.allocated_at,
            expires_at: row.expires_at,
            deletion_requested_at: row.deletion_requested_at,
            last_seen_at: row.last_seen_at,
        }
    }

    fn apply_to(&self, row: &mut Sandbox) {
        row.name = self.name.clone();
        row.status = self.status;
        row.allocated_to_track = self.allocated_to_track.clone();
        row.allocated_at = self.allocated_at;
        row.expires_at = self.expires_at;
        row.deletion_requested_at = self.deletion_requested_at;
        row.last_seen_at = self.last_seen_at;
    }
}

// ---------------------------------------------------------------------------
// ScanPage
// ---------------------------------------------------------------------------

/// One page of a paged scan, ordered by `sandbox_id`.
#[derive(Debug, Clone)]
pub struct ScanPage {
    pub items: Vec<Sandbox>,
    /// Opaque cursor for the next page; `None` when the scan is exhausted.
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// SandboxStore
// ---------------------------------------------------------------------------

/// Conditional-write contract over the sandbox table.
///
/// Primary-key reads observe the latest successful write. `scan_by_status`
/// reads the status index and may lag a just-committed write; callers
/// (notably the allocator) tolerate that.
#[async_trait]
pub trait SandboxStore: Send + Sync {
    async fn get(&self, sandbox_id: Uuid) -> Result<Option<Sandbox>, StoreError>;

    /// Insert a new row. Fails with [`StoreError::Conflict`] when the key
    /// already exists or a non-stale row carries the same `external_id`.
    async fn put_if_absent(&self, row: &Sandbox) -> Result<(), StoreError>;

    /// Write the patch iff the row's current version equals
    /// `expected_version`; the stored version becomes `expected_version + 1`.
    /// Returns the updated row.
    async fn update_if(
        &self,
        sandbox_id: Uuid,
        expected_version: i64,
        patch: &SandboxPatch,
    ) -> Result<Sandbox, StoreError>;

    /// Remove the row iff its current version equals `expected_version`.
    async fn delete_if(&self, sandbox_id: Uuid, expected_version: i64) -> Result<(), StoreError>;

    /// Up to `limit` rows in the given status, ordered by `sandbox_id`.
    async fn scan_by_status(
        &self,
        status: SandboxStatus,
        limit: i64,
    ) -> Result<Vec<Sandbox>, StoreError>;

    /// Keyset-paged scan over all rows, optionally filtered by status.
    async fn paged_scan(
        &self,
        filter: Option<SandboxStatus>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<ScanPage, StoreError>;
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<Uuid>, StoreError> {
    match cursor {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|_| StoreError::InvalidCursor(raw.to_string())),
    }
}
