//! Service façade.
//!
//! The single entry point the transport layer talks to. Each of the five
//! request operations delegates to the allocator, the store, or an admin
//! job; this is also the only place request-scoped context (track id,
//! request id) is attached to the tracing span around store work.

use std::sync::Arc;
use std::time::Duration;

use sbx_config::BrokerConfig;
use sbx_schemas::{Sandbox, SandboxStatus};
use sbx_store::{SandboxStore, ScanPage};
use sbx_upstream::UpstreamInventory;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    AllocateOutcome, Allocator, BrokerError, BrokerMetrics, CleanupReclaimer, SyncReconciler,
    SyncReport,
};

const LIST_LIMIT_DEFAULT: i64 = 50;
const LIST_LIMIT_MAX: i64 = 200;

/// Engine knobs, lifted out of [`BrokerConfig`] so tests can construct them
/// directly.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub k_candidates: usize,
    pub lease_seconds: i64,
    pub deletion_timeout_seconds: i64,
    /// End-to-end deadline for one allocation request.
    pub request_timeout: Duration,
}

impl EngineOptions {
    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self {
            k_candidates: cfg.k_candidates,
            lease_seconds: cfg.lease_seconds,
            deletion_timeout_seconds: cfg.deletion_timeout_seconds,
            request_timeout: cfg.request_timeout,
        }
    }
}

pub struct BrokerService {
    store: Arc<dyn SandboxStore>,
    allocator: Allocator,
    pub sync: Arc<SyncReconciler>,
    pub cleanup: Arc<CleanupReclaimer>,
    request_timeout: Duration,
}

impl BrokerService {
    pub fn new(
        store: Arc<dyn SandboxStore>,
        upstream: Arc<dyn UpstreamInventory>,
        metrics: Arc<BrokerMetrics>,
        opts: EngineOptions,
    ) -> Self {
        let allocator = Allocator::new(
            Arc::clone(&store),
            Arc::clone(&metrics),
            opts.k_candidates,
            opts.lease_seconds,
        );
        let sync = Arc::new(SyncReconciler::new(
            Arc::clone(&store),
            upstream,
            Arc::clone(&metrics),
        ));
        let cleanup = Arc::new(CleanupReclaimer::new(
            Arc::clone(&store),
            Arc::clone(&metrics),
            opts.deletion_timeout_seconds,
        ));

        Self {
            store,
            allocator,
            sync,
            cleanup,
            request_timeout: opts.request_timeout,
        }
    }

    /// Allocate a sandbox to `track_id`, bounded by the request deadline.
    ///
    /// On deadline: the caller gets [`BrokerError::Timeout`]; a claim that
    /// already landed stays allocated and the reclaimer recovers it through
    /// lease expiry.
    #[instrument(skip(self), fields(track_id = %track_id, request_id = %request_id))]
    pub async fn allocate(
        &self,
        track_id: &str,
        request_id: Uuid,
    ) -> Result<AllocateOutcome, BrokerError> {
        match tokio::time::timeout(self.request_timeout, self.allocator.allocate(track_id)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout),
        }
    }

    pub async fn get_sandbox(&self, sandbox_id: Uuid) -> Result<Sandbox, BrokerError> {
        self.store
            .get(sandbox_id)
            .await?
            .ok_or(BrokerError::NotFound)
    }

    #[instrument(skip(self), fields(sandbox_id = %sandbox_id, track_id = %track_id, request_id = %request_id))]
    pub async fn mark_for_deletion(
        &self,
        sandbox_id: Uuid,
        track_id: &str,
        request_id: Uuid,
    ) -> Result<Sandbox, BrokerError> {
        self.allocator.mark_for_deletion(sandbox_id, track_id).await
    }

    /// Admin-triggered reconciliation; serializes with the timer tick.
    pub async fn admin_sync(&self) -> Result<SyncReport, BrokerError> {
        self.sync.run_once().await
    }

    /// Admin paged listing over the pool.
    pub async fn admin_list(
        &self,
        filter: Option<SandboxStatus>,
        cursor: Option<String>,
        limit: Option<i64>,
    ) -> Result<ScanPage, BrokerError> {
        let limit = limit
            .unwrap_or(LIST_LIMIT_DEFAULT)
            .clamp(1, LIST_LIMIT_MAX);
        Ok(self
            .store
            .paged_scan(filter, cursor.as_deref(), limit)
            .await?)
    }
}
