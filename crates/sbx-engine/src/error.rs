//! Engine error taxonomy.
//!
//! Everything the façade can surface to a caller. Version conflicts never
//! appear here: the allocator retries them across its candidate set and the
//! background jobs swallow them row by row.

use sbx_schemas::SandboxStatus;
use sbx_store::StoreError;
use sbx_upstream::UpstreamError;

#[derive(Debug)]
pub enum BrokerError {
    /// The requested sandbox does not exist.
    NotFound,
    /// The sandbox is allocated to a different track.
    NotOwned,
    /// The requested transition is not legal from the row's current status.
    WrongState { status: SandboxStatus },
    /// The allocator exhausted its candidate set.
    NoCapacity,
    /// Malformed caller input (bad cursor, bad status filter).
    BadRequest(String),
    /// The upstream provider failed; local state was not mutated.
    Upstream(String),
    /// The store transport failed.
    StoreUnavailable(String),
    /// The end-to-end request deadline elapsed.
    Timeout,
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::NotFound => write!(f, "sandbox not found"),
            BrokerError::NotOwned => write!(f, "sandbox is held by another track"),
            BrokerError::WrongState { status } => {
                write!(f, "operation not valid in status {}", status.as_str())
            }
            BrokerError::NoCapacity => write!(f, "no sandbox available"),
            BrokerError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            BrokerError::Upstream(msg) => write!(f, "upstream provider error: {msg}"),
            BrokerError::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
            BrokerError::Timeout => write!(f, "request deadline exceeded"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl BrokerError {
    /// Stable machine-readable kind, used in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::NotFound => "not_found",
            BrokerError::NotOwned => "not_owned",
            BrokerError::WrongState { .. } => "wrong_state",
            BrokerError::NoCapacity => "no_capacity",
            BrokerError::BadRequest(_) => "bad_request",
            BrokerError::Upstream(_) => "upstream_error",
            BrokerError::StoreUnavailable(_) => "store_unavailable",
            BrokerError::Timeout => "timeout",
        }
    }
}

impl From<StoreError> for BrokerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => BrokerError::NotFound,
            StoreError::InvalidCursor(c) => BrokerError::BadRequest(format!("invalid cursor: {c}")),
            // Conflicts are handled where they occur; one escaping this far
            // means persistent contention on a single row.
            StoreError::Conflict | StoreError::VersionConflict => {
                BrokerError::StoreUnavailable("persistent write contention".to_string())
            }
            StoreError::Unavailable(msg) => BrokerError::StoreUnavailable(msg),
        }
    }
}

impl From<UpstreamError> for BrokerError {
    fn from(e: UpstreamError) -> Self {
        BrokerError::Upstream(e.to_string())
    }
}
