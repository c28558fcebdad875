//! In-memory store adapter.
//!
//! Backs the scenario tests and the daemon's storeless mode (no
//! `BROKER_DATABASE_URL`). Holds the same contract as the Postgres adapter:
//! version-guarded writes, live `external_id` uniqueness, keyset paging.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use sbx_schemas::{Sandbox, SandboxStatus};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{parse_cursor, SandboxPatch, SandboxStore, ScanPage, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<Uuid, Sandbox>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently held; test convenience.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SandboxStore for MemoryStore {
    async fn get(&self, sandbox_id: Uuid) -> Result<Option<Sandbox>, StoreError> {
        Ok(self.rows.read().await.get(&sandbox_id).cloned())
    }

    async fn put_if_absent(&self, row: &Sandbox) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&row.sandbox_id) {
            return Err(StoreError::Conflict);
        }
        let duplicate_external = rows.values().any(|existing| {
            existing.status != SandboxStatus::Stale && existing.external_id == row.external_id
        });
        if duplicate_external {
            return Err(StoreError::Conflict);
        }
        rows.insert(row.sandbox_id, row.clone());
        Ok(())
    }

    async fn update_if(
        &self,
        sandbox_id: Uuid,
        expected_version: i64,
        patch: &SandboxPatch,
    ) -> Result<Sandbox, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&sandbox_id).ok_or(StoreError::NotFound)?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        patch.apply_to(row);
        row.version = expected_version + 1;
        Ok(row.clone())
    }

    async fn delete_if(&self, sandbox_id: Uuid, expected_version: i64) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get(&sandbox_id).ok_or(StoreError::NotFound)?;
        if row.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        rows.remove(&sandbox_id);
        Ok(())
    }

    async fn scan_by_status(
        &self,
        status: SandboxStatus,
        limit: i64,
    ) -> Result<Vec<Sandbox>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn paged_scan(
        &self,
        filter: Option<SandboxStatus>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<ScanPage, StoreError> {
        let after = parse_cursor(cursor)?;
        let limit = limit.max(0) as usize;
        let rows = self.rows.read().await;

        let range_start = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let items: Vec<Sandbox> = rows
            .range((range_start, Bound::Unbounded))
            .map(|(_, r)| r)
            .filter(|r| filter.map(|s| r.status == s).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect();

        let next_cursor = if items.len() == limit && limit > 0 {
            items.last().map(|r| r.sandbox_id.to_string())
        } else {
            None
        };
        Ok(ScanPage { items, next_cursor })
    }
}
