//! Conditional-write contract scenarios against the in-memory adapter.

use sbx_schemas::{Sandbox, SandboxEvent, SandboxStatus};
use sbx_store::{MemoryStore, SandboxPatch, SandboxStore, StoreError};

fn seed(n: usize) -> Vec<Sandbox> {
    (0..n)
        .map(|i| Sandbox::new_available(format!("lab-{i}"), format!("acct-{i}"), 1_000))
        .collect()
}

#[tokio::test]
async fn put_if_absent_rejects_duplicate_key() {
    let store = MemoryStore::new();
    let row = seed(1).remove(0);
    store.put_if_absent(&row).await.unwrap();

    let err = store.put_if_absent(&row).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn put_if_absent_rejects_live_duplicate_external_id() {
    let store = MemoryStore::new();
    store
        .put_if_absent(&Sandbox::new_available("lab-a", "acct-shared", 1_000))
        .await
        .unwrap();

    // Different sandbox_id, same live external_id.
    let dup = Sandbox::new_available("lab-b", "acct-shared", 1_000);
    let err = store.put_if_absent(&dup).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));

    // A stale row does not block reuse of its external_id.
    let mut tombstone = Sandbox::new_available("lab-c", "acct-old", 1_000);
    tombstone.status = SandboxStatus::Stale;
    store.put_if_absent(&tombstone).await.unwrap();
    store
        .put_if_absent(&Sandbox::new_available("lab-d", "acct-old", 1_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn update_if_bumps_version_by_exactly_one() {
    let store = MemoryStore::new();
    let row = seed(1).remove(0);
    store.put_if_absent(&row).await.unwrap();

    let mut next = row.clone();
    next.apply(&SandboxEvent::Allocate {
        track_id: "track-1".to_string(),
        now: 2_000,
        lease_seconds: 60,
    })
    .unwrap();

    let updated = store
        .update_if(row.sandbox_id, row.version, &SandboxPatch::of(&next))
        .await
        .unwrap();
    assert_eq!(updated.version, row.version + 1);
    assert_eq!(updated.status, SandboxStatus::Allocated);

    // Read-your-writes on the primary key.
    let read = store.get(row.sandbox_id).await.unwrap().unwrap();
    assert_eq!(read, updated);
}

#[tokio::test]
async fn update_if_refuses_stale_version() {
    let store = MemoryStore::new();
    let row = seed(1).remove(0);
    store.put_if_absent(&row).await.unwrap();

    let patch = SandboxPatch::of(&row);
    store
        .update_if(row.sandbox_id, row.version, &patch)
        .await
        .unwrap();

    // Retrying with the original version must lose.
    let err = store
        .update_if(row.sandbox_id, row.version, &patch)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict));

    let err = store
        .update_if(uuid::Uuid::new_v4(), 1, &patch)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn delete_if_is_version_guarded() {
    let store = MemoryStore::new();
    let row = seed(1).remove(0);
    store.put_if_absent(&row).await.unwrap();

    let err = store
        .delete_if(row.sandbox_id, row.version + 5)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict));
    assert_eq!(store.len().await, 1);

    store.delete_if(row.sandbox_id, row.version).await.unwrap();
    assert!(store.get(row.sandbox_id).await.unwrap().is_none());
}

#[tokio::test]
async fn scan_by_status_honors_filter_and_limit() {
    let store = MemoryStore::new();
    for row in seed(5) {
        store.put_if_absent(&row).await.unwrap();
    }
    let mut pending = Sandbox::new_available("lab-pending", "acct-pending", 1_000);
    pending.status = SandboxStatus::PendingDeletion;
    pending.deletion_requested_at = Some(900);
    store.put_if_absent(&pending).await.unwrap();

    let available = store
        .scan_by_status(SandboxStatus::Available, 3)
        .await
        .unwrap();
    assert_eq!(available.len(), 3);
    assert!(available
        .iter()
        .all(|r| r.status == SandboxStatus::Available));

    let pending_rows = store
        .scan_by_status(SandboxStatus::PendingDeletion, 10)
        .await
        .unwrap();
    assert_eq!(pending_rows.len(), 1);
}

#[tokio::test]
async fn paged_scan_walks_every_row_exactly_once() {
    let store = MemoryStore::new();
    for row in seed(5) {
        store.put_if_absent(&row).await.unwrap();
    }

    let mut collected = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.paged_scan(None, cursor.as_deref(), 2).await.unwrap();
        collected.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(collected.len(), 5);
    let mut ids: Vec<_> = collected.iter().map(|r| r.sandbox_id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 5, "no row may appear on two pages");
}

#[tokio::test]
async fn paged_scan_rejects_foreign_cursor() {
    let store = MemoryStore::new();
    let err = store
        .paged_scan(None, Some("not-a-cursor"), 10)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidCursor(_)));
}
