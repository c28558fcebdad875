//! The cleanup reclaimer returns expired leases to the pool.

use std::sync::Arc;
use std::time::Duration;

use sbx_engine::{BrokerMetrics, BrokerService, EngineOptions};
use sbx_schemas::{Sandbox, SandboxStatus};
use sbx_store::{MemoryStore, SandboxStore};
use sbx_upstream::MockInventory;
use uuid::Uuid;

/// Lease length zero: every allocation expires the moment it lands.
fn zero_lease_service(store: Arc<MemoryStore>) -> Arc<BrokerService> {
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BrokerMetrics::new(&registry).unwrap());
    Arc::new(BrokerService::new(
        Arc::clone(&store) as Arc<dyn SandboxStore>,
        Arc::new(MockInventory::with_fixture()),
        metrics,
        EngineOptions {
            k_candidates: 15,
            lease_seconds: 0,
            deletion_timeout_seconds: 3_600,
            request_timeout: Duration::from_secs(10),
        },
    ))
}

#[tokio::test]
async fn expired_lease_is_reclaimed_with_fields_cleared() {
    let store = Arc::new(MemoryStore::new());
    store
        .put_if_absent(&Sandbox::new_available("lab-0", "acct-0", 1_000))
        .await
        .unwrap();
    let service = zero_lease_service(Arc::clone(&store));

    let outcome = service.allocate("track-1", Uuid::new_v4()).await.unwrap();
    let allocated = outcome.sandbox().clone();
    assert_eq!(allocated.version, 2);

    let report = service.cleanup.run_once().await.unwrap();
    assert_eq!(report.leases_reclaimed, 1);
    assert_eq!(report.deletions_promoted, 0);

    let row = service.get_sandbox(allocated.sandbox_id).await.unwrap();
    assert_eq!(row.status, SandboxStatus::Available);
    assert!(row.allocated_to_track.is_none());
    assert!(row.allocated_at.is_none());
    assert!(row.expires_at.is_none());
    assert_eq!(row.version, 3, "reclaim is one more conditional write");
}

#[tokio::test]
async fn live_leases_are_left_alone() {
    let store = Arc::new(MemoryStore::new());
    store
        .put_if_absent(&Sandbox::new_available("lab-0", "acct-0", 1_000))
        .await
        .unwrap();

    // Hour-long lease: nothing should be reclaimable.
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BrokerMetrics::new(&registry).unwrap());
    let service = Arc::new(BrokerService::new(
        Arc::clone(&store) as Arc<dyn SandboxStore>,
        Arc::new(MockInventory::with_fixture()),
        metrics,
        EngineOptions {
            k_candidates: 15,
            lease_seconds: 3_600,
            deletion_timeout_seconds: 3_600,
            request_timeout: Duration::from_secs(10),
        },
    ));

    let outcome = service.allocate("track-1", Uuid::new_v4()).await.unwrap();
    let report = service.cleanup.run_once().await.unwrap();
    assert_eq!(report.leases_reclaimed, 0);

    let row = service
        .get_sandbox(outcome.sandbox().sandbox_id)
        .await
        .unwrap();
    assert_eq!(row.status, SandboxStatus::Allocated);
}
