//! Shared runtime state for sbx-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The state is assembled
//! once in `main.rs` (or directly by scenario tests) from the store and
//! upstream implementations selected at startup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use prometheus::Registry;
use sbx_config::BrokerConfig;
use sbx_engine::BrokerService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in the health response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Verdict for one request against a client's token bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after_secs: u64 },
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client token bucket keyed by bearer token.
///
/// The map lives behind a std `Mutex`: the critical section is a handful of
/// float operations and never awaits.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    rps: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: rps.max(0.001),
            burst: burst.max(1.0),
        }
    }

    /// The advertised per-client limit (`X-RateLimit-Limit`).
    pub fn limit(&self) -> u64 {
        self.burst as u64
    }

    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision::Allowed {
                remaining: bucket.tokens as u64,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateDecision::Limited {
                retry_after_secs: (deficit / self.rps).ceil() as u64,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub service: Arc<BrokerService>,
    /// Registry exposed on /metrics; the engine's collectors live in it.
    pub registry: Registry,
    pub build: BuildInfo,
    /// Bearer token accepted on user endpoints.
    pub api_token: String,
    /// Bearer token accepted on admin endpoints.
    pub admin_token: String,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(cfg: &BrokerConfig, service: Arc<BrokerService>, registry: Registry) -> Self {
        Self {
            service,
            registry,
            build: BuildInfo {
                service: "sbx-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            api_token: cfg.api_token.clone(),
            admin_token: cfg.admin_token.clone(),
            rate_limiter: RateLimiter::new(cfg.rate_limit_rps, cfg.rate_limit_burst),
        }
    }
}
