//! Deletions that outlive the deletion timeout surface as deletion_failed.

use std::sync::Arc;
use std::time::Duration;

use sbx_engine::{BrokerMetrics, BrokerService, EngineOptions};
use sbx_schemas::{epoch_now, Sandbox, SandboxStatus};
use sbx_store::{MemoryStore, SandboxStore};
use sbx_upstream::MockInventory;

fn service_with_timeout(store: Arc<MemoryStore>, deletion_timeout: i64) -> Arc<BrokerService> {
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BrokerMetrics::new(&registry).unwrap());
    Arc::new(BrokerService::new(
        Arc::clone(&store) as Arc<dyn SandboxStore>,
        Arc::new(MockInventory::with_fixture()),
        metrics,
        EngineOptions {
            k_candidates: 15,
            lease_seconds: 3_600,
            deletion_timeout_seconds: deletion_timeout,
            request_timeout: Duration::from_secs(10),
        },
    ))
}

fn pending_row(external_id: &str, requested_at: i64) -> Sandbox {
    let mut row = Sandbox::new_available(format!("lab-{external_id}"), external_id, 1_000);
    row.status = SandboxStatus::PendingDeletion;
    row.deletion_requested_at = Some(requested_at);
    row
}

#[tokio::test]
async fn overdue_pending_deletion_is_promoted() {
    let store = Arc::new(MemoryStore::new());
    let now = epoch_now();

    // Requested two hours ago against a one-hour timeout.
    let stuck = pending_row("acct-stuck", now - 7_200);
    store.put_if_absent(&stuck).await.unwrap();

    let service = service_with_timeout(Arc::clone(&store), 3_600);
    let report = service.cleanup.run_once().await.unwrap();
    assert_eq!(report.deletions_promoted, 1);

    let row = service.get_sandbox(stuck.sandbox_id).await.unwrap();
    assert_eq!(row.status, SandboxStatus::DeletionFailed);
    assert_eq!(row.deletion_requested_at, Some(now - 7_200));
    assert_eq!(row.version, stuck.version + 1);
}

#[tokio::test]
async fn fresh_pending_deletion_is_left_waiting() {
    let store = Arc::new(MemoryStore::new());
    let now = epoch_now();

    let fresh = pending_row("acct-fresh", now);
    store.put_if_absent(&fresh).await.unwrap();

    let service = service_with_timeout(Arc::clone(&store), 3_600);
    let report = service.cleanup.run_once().await.unwrap();
    assert_eq!(report.deletions_promoted, 0);

    let row = service.get_sandbox(fresh.sandbox_id).await.unwrap();
    assert_eq!(row.status, SandboxStatus::PendingDeletion);
    assert_eq!(row.version, fresh.version);
}
