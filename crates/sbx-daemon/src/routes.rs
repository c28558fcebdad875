//! Axum router and all HTTP handlers for sbx-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! the outer middleware layers (trace, CORS). All handlers are `pub(crate)`
//! so the scenario tests in `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use sbx_engine::{AllocateOutcome, BrokerError};
use sbx_schemas::SandboxStatus;
use tracing::error;
use uuid::Uuid;

use crate::api_types::{AdminListQuery, AdminListResponse, HealthResponse};
use crate::middleware::{self, refuse, RequestId};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Outer middleware (trace, CORS) is **not** applied here; `main.rs` attaches
/// it after this call so tests can drive the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let user_routes = Router::new()
        .route("/v1/allocate", post(allocate))
        .route("/v1/sandboxes/:id", get(get_sandbox))
        .route("/v1/sandboxes/:id/mark-for-deletion", post(mark_for_deletion))
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::require_user_token,
        ));

    let admin_routes = Router::new()
        .route("/v1/admin/sync", post(admin_sync))
        .route("/v1/admin/sandboxes", get(admin_list))
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::require_admin_token,
        ));

    Router::new()
        .merge(user_routes)
        .merge(admin_routes)
        // Everything above is rate-limited; /healthz and /metrics bypass.
        .route_layer(from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit,
        ))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::request_id))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn broker_error_response(err: BrokerError, request_id: Uuid) -> Response {
    let status = match &err {
        BrokerError::NotFound => StatusCode::NOT_FOUND,
        BrokerError::NotOwned => StatusCode::FORBIDDEN,
        BrokerError::WrongState { .. } | BrokerError::NoCapacity => StatusCode::CONFLICT,
        BrokerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        BrokerError::Upstream(_) => StatusCode::BAD_GATEWAY,
        BrokerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BrokerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
    };
    refuse(status, err.kind(), err.to_string(), request_id)
}

/// `X-Track-ID` is mandatory on the mutating user endpoints.
fn track_header(headers: &HeaderMap, request_id: Uuid) -> Result<&str, Response> {
    headers
        .get("x-track-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            refuse(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "missing X-Track-ID header",
                request_id,
            )
        })
}

// ---------------------------------------------------------------------------
// POST /v1/allocate
// ---------------------------------------------------------------------------

pub(crate) async fn allocate(
    State(st): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    headers: HeaderMap,
) -> Response {
    let track_id = match track_header(&headers, rid.0) {
        Ok(track) => track,
        Err(resp) => return resp,
    };

    match st.service.allocate(track_id, rid.0).await {
        Ok(AllocateOutcome::Created(sandbox)) => {
            (StatusCode::CREATED, Json(sandbox)).into_response()
        }
        Ok(AllocateOutcome::Existing(sandbox)) => (StatusCode::OK, Json(sandbox)).into_response(),
        Err(err) => broker_error_response(err, rid.0),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/sandboxes/{id}
// ---------------------------------------------------------------------------

pub(crate) async fn get_sandbox(
    State(st): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(sandbox_id): Path<Uuid>,
) -> Response {
    match st.service.get_sandbox(sandbox_id).await {
        Ok(sandbox) => (StatusCode::OK, Json(sandbox)).into_response(),
        Err(err) => broker_error_response(err, rid.0),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/sandboxes/{id}/mark-for-deletion
// ---------------------------------------------------------------------------

pub(crate) async fn mark_for_deletion(
    State(st): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(sandbox_id): Path<Uuid>,
    headers: HeaderMap,
) -> Response {
    let track_id = match track_header(&headers, rid.0) {
        Ok(track) => track,
        Err(resp) => return resp,
    };

    match st.service.mark_for_deletion(sandbox_id, track_id, rid.0).await {
        Ok(sandbox) => (StatusCode::OK, Json(sandbox)).into_response(),
        Err(err) => broker_error_response(err, rid.0),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/admin/sync
// ---------------------------------------------------------------------------

pub(crate) async fn admin_sync(
    State(st): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
) -> Response {
    match st.service.admin_sync().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => broker_error_response(err, rid.0),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/admin/sandboxes?status=&cursor=&limit=
// ---------------------------------------------------------------------------

pub(crate) async fn admin_list(
    State(st): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Query(query): Query<AdminListQuery>,
) -> Response {
    let filter = match query.status.as_deref() {
        None => None,
        Some(raw) => match SandboxStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return refuse(
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    format!("unknown status filter: {raw}"),
                    rid.0,
                )
            }
        },
    };

    match st
        .service
        .admin_list(filter, query.cursor, query.limit)
        .await
    {
        Ok(page) => (
            StatusCode::OK,
            Json(AdminListResponse {
                items: page.items,
                next_cursor: page.next_cursor,
            }),
        )
            .into_response(),
        Err(err) => broker_error_response(err, rid.0),
    }
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

pub(crate) async fn healthz(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> Response {
    let families = st.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        error!(error = %e, "metrics encode failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
