//! Request and response types for the sbx-daemon HTTP endpoints.
//!
//! Sandbox payloads serialize the `sbx_schemas::Sandbox` entity directly;
//! only the envelope types live here. No business logic.

use sbx_schemas::Sandbox;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /healthz
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// Body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. `no_capacity`.
    pub error: String,
    pub message: String,
    pub request_id: Uuid,
}

// ---------------------------------------------------------------------------
// GET /v1/admin/sandboxes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AdminListQuery {
    pub status: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminListResponse {
    pub items: Vec<Sandbox>,
    pub next_cursor: Option<String>,
}
