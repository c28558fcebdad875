//! The reconciler never runs two ticks concurrently in one process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sbx_engine::{BrokerMetrics, BrokerService, EngineOptions};
use sbx_store::{MemoryStore, SandboxStore};
use sbx_upstream::{UpstreamAccount, UpstreamError, UpstreamInventory};

/// Inventory that holds each fetch open long enough for a second tick to
/// collide with the first.
struct SlowInventory {
    delay: Duration,
}

#[async_trait]
impl UpstreamInventory for SlowInventory {
    async fn list_accounts(&self) -> Result<Vec<UpstreamAccount>, UpstreamError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![UpstreamAccount {
            external_id: "acct-slow".to_string(),
            name: "lab-slow".to_string(),
            state: "active".to_string(),
        }])
    }
}

#[tokio::test]
async fn timer_tick_is_skipped_while_a_tick_is_in_flight() {
    let store = Arc::new(MemoryStore::new());
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(BrokerMetrics::new(&registry).unwrap());
    let service = Arc::new(BrokerService::new(
        Arc::clone(&store) as Arc<dyn SandboxStore>,
        Arc::new(SlowInventory {
            delay: Duration::from_millis(300),
        }),
        Arc::clone(&metrics),
        EngineOptions {
            k_candidates: 15,
            lease_seconds: 3_600,
            deletion_timeout_seconds: 3_600,
            request_timeout: Duration::from_secs(10),
        },
    ));

    // First tick in flight…
    let in_flight = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.sync.run_once().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // …so the timer path must skip, not queue.
    assert!(service.sync.run_if_idle().await.is_none());
    assert_eq!(metrics.sync_skipped_total.get(), 1);

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.inserted, 1);

    // Once idle again, the timer path runs normally.
    let second = service.sync.run_if_idle().await.unwrap().unwrap();
    assert_eq!(second.refreshed, 1);
    assert_eq!(metrics.sync_runs_total.get(), 2);
}
