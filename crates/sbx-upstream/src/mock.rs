//! Fixture-backed inventory for mock mode.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{UpstreamAccount, UpstreamError, UpstreamInventory};

/// In-process inventory returning a fixed account list.
///
/// Selected at startup when `CSP_API_TOKEN` is empty. The list can be
/// replaced at runtime so seed tooling and scenario tests can steer what the
/// reconciler observes on its next tick.
pub struct MockInventory {
    accounts: RwLock<Vec<UpstreamAccount>>,
}

impl MockInventory {
    pub fn new(accounts: Vec<UpstreamAccount>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    /// The default fixture: three active sandbox accounts.
    pub fn with_fixture() -> Self {
        Self::new(
            (1..=3)
                .map(|i| UpstreamAccount {
                    external_id: format!("mock-acct-{i}"),
                    name: format!("mock-sandbox-{i}"),
                    state: "active".to_string(),
                })
                .collect(),
        )
    }

    /// Replace the fixture observed by subsequent `list_accounts` calls.
    pub async fn set_accounts(&self, accounts: Vec<UpstreamAccount>) {
        *self.accounts.write().await = accounts;
    }
}

#[async_trait]
impl UpstreamInventory for MockInventory {
    async fn list_accounts(&self) -> Result<Vec<UpstreamAccount>, UpstreamError> {
        Ok(self.accounts.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_is_stable_until_replaced() {
        let mock = MockInventory::with_fixture();
        let first = mock.list_accounts().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].external_id, "mock-acct-1");

        mock.set_accounts(vec![UpstreamAccount {
            external_id: "mock-acct-9".to_string(),
            name: "mock-sandbox-9".to_string(),
            state: "active".to_string(),
        }])
        .await;

        let second = mock.list_accounts().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].external_id, "mock-acct-9");
    }
}
