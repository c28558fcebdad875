//! Only the owning track may release a sandbox into the deletion pipeline.

use std::sync::Arc;
use std::time::Duration;

use sbx_engine::{BrokerError, BrokerMetrics, BrokerService, EngineOptions};
use sbx_schemas::{Sandbox, SandboxStatus};
use sbx_store::{MemoryStore, SandboxStore};
use sbx_upstream::MockInventory;
use uuid::Uuid;

fn test_service(store: Arc<MemoryStore>) -> Arc<BrokerService> {
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BrokerMetrics::new(&registry).unwrap());
    Arc::new(BrokerService::new(
        Arc::clone(&store) as Arc<dyn SandboxStore>,
        Arc::new(MockInventory::with_fixture()),
        metrics,
        EngineOptions {
            k_candidates: 15,
            lease_seconds: 3_600,
            deletion_timeout_seconds: 3_600,
            request_timeout: Duration::from_secs(10),
        },
    ))
}

#[tokio::test]
async fn foreign_track_is_refused_owner_succeeds() {
    let store = Arc::new(MemoryStore::new());
    store
        .put_if_absent(&Sandbox::new_available("lab-0", "acct-0", 1_000))
        .await
        .unwrap();
    let service = test_service(Arc::clone(&store));

    let outcome = service.allocate("track-1", Uuid::new_v4()).await.unwrap();
    let sandbox_id = outcome.sandbox().sandbox_id;

    // A different track must be refused and the row left untouched.
    let err = service
        .mark_for_deletion(sandbox_id, "track-2", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotOwned));
    let row = service.get_sandbox(sandbox_id).await.unwrap();
    assert_eq!(row.status, SandboxStatus::Allocated);
    assert_eq!(row.allocated_to_track.as_deref(), Some("track-1"));

    // The owner releases it.
    let released = service
        .mark_for_deletion(sandbox_id, "track-1", Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(released.status, SandboxStatus::PendingDeletion);
    assert!(released.deletion_requested_at.is_some());
    assert!(released.allocated_to_track.is_none());
    assert!(released.allocated_at.is_none());
    assert!(released.expires_at.is_none());
    assert_eq!(released.version, row.version + 1);
}

#[tokio::test]
async fn release_is_not_repeatable_once_out_of_allocated() {
    let store = Arc::new(MemoryStore::new());
    store
        .put_if_absent(&Sandbox::new_available("lab-0", "acct-0", 1_000))
        .await
        .unwrap();
    let service = test_service(Arc::clone(&store));

    let outcome = service.allocate("track-1", Uuid::new_v4()).await.unwrap();
    let sandbox_id = outcome.sandbox().sandbox_id;
    service
        .mark_for_deletion(sandbox_id, "track-1", Uuid::new_v4())
        .await
        .unwrap();

    let err = service
        .mark_for_deletion(sandbox_id, "track-1", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::WrongState {
            status: SandboxStatus::PendingDeletion
        }
    ));
}

#[tokio::test]
async fn unknown_sandbox_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let service = test_service(store);

    let err = service
        .mark_for_deletion(Uuid::new_v4(), "track-1", Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotFound));
}
