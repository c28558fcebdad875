//! Upstream sandbox-account inventory.
//!
//! The provider (CSP) is the system of record for sandbox accounts. The
//! broker only ever asks it one question — "which accounts exist right now?"
//! — through [`UpstreamInventory`]. Two implementations:
//!
//! - [`CspClient`] — HTTP against the CSP API with a bearer credential.
//! - [`MockInventory`] — fixed in-process fixture. This is a first-class
//!   mode selected at startup when no CSP credential is configured, not a
//!   test hook; the daemon logs which mode it is running in.

use async_trait::async_trait;

mod csp;
mod mock;

pub use csp::CspClient;
pub use mock::MockInventory;

// ---------------------------------------------------------------------------
// UpstreamAccount
// ---------------------------------------------------------------------------

/// One sandbox account as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamAccount {
    /// Provider-side identifier; becomes the local row's `external_id`.
    pub external_id: String,
    pub name: String,
    /// Provider lifecycle state, e.g. `"active"`. Informational.
    pub state: String,
}

// ---------------------------------------------------------------------------
// UpstreamError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum UpstreamError {
    /// Connection, timeout, or decode failure.
    Transport(String),
    /// The provider answered with a non-success status.
    Status(u16),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Transport(msg) => write!(f, "upstream transport error: {msg}"),
            UpstreamError::Status(code) => write!(f, "upstream returned status {code}"),
        }
    }
}

impl std::error::Error for UpstreamError {}

// ---------------------------------------------------------------------------
// UpstreamInventory
// ---------------------------------------------------------------------------

/// Read-only view of the provider's account inventory.
#[async_trait]
pub trait UpstreamInventory: Send + Sync {
    /// The full authoritative account list. No paging: the sandbox pool is
    /// bounded and the provider returns it in one response.
    async fn list_accounts(&self) -> Result<Vec<UpstreamAccount>, UpstreamError>;
}
