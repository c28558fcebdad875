//! HTTP inventory client for the CSP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{UpstreamAccount, UpstreamError, UpstreamInventory};

const ACCOUNTS_PATH: &str = "/v2/current_user/accounts";

pub struct CspClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CspClient {
    /// Build a client with a bounded connection pool and a per-call timeout.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

// Wire DTOs. The accounts endpoint wraps its payload in a `results` array;
// unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct AccountsEnvelope {
    #[serde(default)]
    results: Vec<CspAccount>,
}

#[derive(Debug, Deserialize)]
struct CspAccount {
    id: String,
    name: String,
    #[serde(default)]
    state: String,
}

impl From<CspAccount> for UpstreamAccount {
    fn from(a: CspAccount) -> Self {
        Self {
            external_id: a.id,
            name: a.name,
            state: a.state,
        }
    }
}

#[async_trait]
impl UpstreamInventory for CspClient {
    async fn list_accounts(&self) -> Result<Vec<UpstreamAccount>, UpstreamError> {
        let url = format!("{}{ACCOUNTS_PATH}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(UpstreamError::Status(resp.status().as_u16()));
        }

        let envelope: AccountsEnvelope = resp
            .json()
            .await
            .map_err(|e| UpstreamError::Transport(format!("decode accounts response: {e}")))?;

        debug!(count = envelope.results.len(), "fetched upstream accounts");
        Ok(envelope.results.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_envelope_decodes_and_ignores_unknown_fields() {
        let body = r#"{
            "results": [
                {"id": "acct-1", "name": "lab-sandbox-1", "state": "active", "tier": "v2"},
                {"id": "acct-2", "name": "lab-sandbox-2"}
            ],
            "page": 1
        }"#;

        let envelope: AccountsEnvelope = serde_json::from_str(body).unwrap();
        let accounts: Vec<UpstreamAccount> =
            envelope.results.into_iter().map(Into::into).collect();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].external_id, "acct-1");
        assert_eq!(accounts[0].state, "active");
        // Missing state defaults to empty rather than failing the decode.
        assert_eq!(accounts[1].state, "");
    }

    #[test]
    fn empty_envelope_decodes_to_no_accounts() {
        let envelope: AccountsEnvelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.results.is_empty());
    }
}
