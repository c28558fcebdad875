//! Broker configuration.
//!
//! One immutable record populated from the environment at startup. Every
//! recognized key is read here — nothing else in the workspace consults
//! `std::env` for broker settings.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

pub const ENV_API_TOKEN: &str = "BROKER_API_TOKEN";
pub const ENV_ADMIN_TOKEN: &str = "BROKER_ADMIN_TOKEN";
pub const ENV_BIND_ADDR: &str = "BROKER_BIND_ADDR";
pub const ENV_DATABASE_URL: &str = "BROKER_DATABASE_URL";
pub const ENV_LAB_DURATION_HOURS: &str = "LAB_DURATION_HOURS";
pub const ENV_K_CANDIDATES: &str = "K_CANDIDATES";
pub const ENV_SYNC_INTERVAL: &str = "SYNC_INTERVAL_SECONDS";
pub const ENV_CLEANUP_INTERVAL: &str = "CLEANUP_INTERVAL_SECONDS";
pub const ENV_DELETION_TIMEOUT: &str = "DELETION_TIMEOUT_SECONDS";
pub const ENV_STORE_TIMEOUT: &str = "STORE_TIMEOUT_SECONDS";
pub const ENV_UPSTREAM_TIMEOUT: &str = "UPSTREAM_TIMEOUT_SECONDS";
pub const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT_SECONDS";
pub const ENV_RATE_LIMIT_RPS: &str = "RATE_LIMIT_RPS";
pub const ENV_RATE_LIMIT_BURST: &str = "RATE_LIMIT_BURST";
pub const ENV_CSP_API_TOKEN: &str = "CSP_API_TOKEN";
pub const ENV_CSP_BASE_URL: &str = "CSP_BASE_URL";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_CSP_BASE_URL: &str = "https://csp.infoblox.com";

/// Immutable broker configuration, fully resolved at startup.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bearer token accepted on user endpoints.
    pub api_token: String,
    /// Bearer token accepted on admin endpoints.
    pub admin_token: String,
    pub bind_addr: SocketAddr,
    /// Postgres URL for the store; `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Lease length in seconds (`LAB_DURATION_HOURS` × 3600).
    pub lease_seconds: i64,
    /// Candidate limit per allocation attempt.
    pub k_candidates: usize,
    pub sync_interval: Duration,
    pub cleanup_interval: Duration,
    /// Seconds a `pending_deletion` row may wait before promotion to
    /// `deletion_failed`.
    pub deletion_timeout_seconds: i64,
    pub store_timeout: Duration,
    pub upstream_timeout: Duration,
    /// End-to-end allocation deadline.
    pub request_timeout: Duration,
    /// Token-bucket refill rate per client.
    pub rate_limit_rps: f64,
    /// Token-bucket capacity per client.
    pub rate_limit_burst: f64,
    /// Upstream credential; `None` selects the mock inventory.
    pub csp_api_token: Option<String>,
    pub csp_base_url: String,
}

impl BrokerConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// The seam exists so tests can exercise parsing and defaulting without
    /// mutating process-global environment state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = required(&get, ENV_API_TOKEN)?;
        let admin_token = required(&get, ENV_ADMIN_TOKEN)?;

        let bind_addr: SocketAddr = nonempty(&get, ENV_BIND_ADDR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .with_context(|| format!("invalid {ENV_BIND_ADDR}"))?;

        let lease_hours = parse_i64(&get, ENV_LAB_DURATION_HOURS, 4)?;
        if lease_hours < 0 {
            return Err(anyhow!("{ENV_LAB_DURATION_HOURS} must be >= 0"));
        }

        let k_candidates = parse_i64(&get, ENV_K_CANDIDATES, 15)?;
        if k_candidates < 1 {
            return Err(anyhow!("{ENV_K_CANDIDATES} must be >= 1"));
        }

        Ok(Self {
            api_token,
            admin_token,
            bind_addr,
            database_url: nonempty(&get, ENV_DATABASE_URL),
            lease_seconds: lease_hours * 3_600,
            k_candidates: k_candidates as usize,
            sync_interval: Duration::from_secs(parse_u64(&get, ENV_SYNC_INTERVAL, 300)?),
            cleanup_interval: Duration::from_secs(parse_u64(&get, ENV_CLEANUP_INTERVAL, 60)?),
            deletion_timeout_seconds: parse_i64(&get, ENV_DELETION_TIMEOUT, 3_600)?,
            store_timeout: Duration::from_secs(parse_u64(&get, ENV_STORE_TIMEOUT, 5)?),
            upstream_timeout: Duration::from_secs(parse_u64(&get, ENV_UPSTREAM_TIMEOUT, 15)?),
            request_timeout: Duration::from_secs(parse_u64(&get, ENV_REQUEST_TIMEOUT, 10)?),
            rate_limit_rps: parse_f64(&get, ENV_RATE_LIMIT_RPS, 10.0)?,
            rate_limit_burst: parse_f64(&get, ENV_RATE_LIMIT_BURST, 20.0)?,
            csp_api_token: nonempty(&get, ENV_CSP_API_TOKEN),
            csp_base_url: nonempty(&get, ENV_CSP_BASE_URL)
                .unwrap_or_else(|| DEFAULT_CSP_BASE_URL.to_string()),
        })
    }
}

fn nonempty(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    nonempty(get, key).ok_or_else(|| anyhow!("missing env var {key}"))
}

fn parse_i64(get: &impl Fn(&str) -> Option<String>, key: &str, default: i64) -> Result<i64> {
    match nonempty(get, key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid integer in {key}: {raw}")),
        None => Ok(default),
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64> {
    match nonempty(get, key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid integer in {key}: {raw}")),
        None => Ok(default),
    }
}

fn parse_f64(get: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> Result<f64> {
    match nonempty(get, key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid number in {key}: {raw}")),
        None => Ok(default),
    }
}
