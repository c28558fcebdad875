//! Request middleware: request ids, security headers, bearer auth, and the
//! per-client token-bucket rate limiter.
//!
//! Ordering (outermost first): request-id → security headers → rate limiter
//! → auth. `/healthz` and `/metrics` sit outside the rate-limited and
//! authenticated route groups entirely.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::api_types::ErrorResponse;
use crate::state::{AppState, RateDecision};

/// Per-request correlation id, inserted before any other processing and
/// echoed back as `X-Request-ID`.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Read the request id planted by [`request_id`]; falls back to a fresh id
/// so error paths always carry one.
pub fn request_id_of(req: &Request) -> Uuid {
    req.extensions()
        .get::<RequestId>()
        .map(|r| r.0)
        .unwrap_or_else(Uuid::new_v4)
}

/// Build the standard refusal body.
pub fn refuse(
    status: StatusCode,
    error: &str,
    message: impl Into<String>,
    request_id: Uuid,
) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
            request_id,
        }),
    )
        .into_response()
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// ---------------------------------------------------------------------------
// Request id
// ---------------------------------------------------------------------------

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(id);

    let mut resp = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        resp.headers_mut().insert("x-request-id", value);
    }
    resp
}

// ---------------------------------------------------------------------------
// Security headers
// ---------------------------------------------------------------------------

pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

pub async fn rate_limit(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(&req);
    let key = bearer_token(req.headers()).unwrap_or("anonymous").to_string();
    let limit = st.rate_limiter.limit();

    match st.rate_limiter.check(&key) {
        RateDecision::Allowed { remaining } => {
            let mut resp = next.run(req).await;
            let headers = resp.headers_mut();
            headers.insert("x-ratelimit-limit", numeric_header(limit));
            headers.insert("x-ratelimit-remaining", numeric_header(remaining));
            resp
        }
        RateDecision::Limited { retry_after_secs } => {
            let mut resp = refuse(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "request rate exceeded; slow down",
                request_id,
            );
            let headers = resp.headers_mut();
            headers.insert("x-ratelimit-limit", numeric_header(limit));
            headers.insert("x-ratelimit-remaining", numeric_header(0));
            headers.insert(header::RETRY_AFTER, numeric_header(retry_after_secs));
            resp
        }
    }
}

fn numeric_header(n: u64) -> HeaderValue {
    HeaderValue::from_str(&n.to_string()).unwrap_or(HeaderValue::from_static("0"))
}

// ---------------------------------------------------------------------------
// Bearer auth
// ---------------------------------------------------------------------------

/// User endpoints accept the user token; the admin token is a superset
/// credential and passes too.
pub async fn require_user_token(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(&req);
    let token = bearer_token(req.headers()).map(str::to_string);
    match token.as_deref() {
        Some(token) if token == st.api_token || token == st.admin_token => next.run(req).await,
        Some(_) | None => refuse(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
            request_id,
        ),
    }
}

/// Admin endpoints require the admin token. A valid user token is
/// authenticated but not authorized.
pub async fn require_admin_token(
    State(st): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(&req);
    let token = bearer_token(req.headers()).map(str::to_string);
    match token.as_deref() {
        Some(token) if token == st.admin_token => next.run(req).await,
        Some(token) if token == st.api_token => refuse(
            StatusCode::FORBIDDEN,
            "forbidden",
            "admin token required",
            request_id,
        ),
        Some(_) | None => refuse(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing or invalid bearer token",
            request_id,
        ),
    }
}
