//! Postgres store adapter.
//!
//! One table, `sandbox_pool`, owned by the embedded migrations. Conditional
//! writes are single statements guarded by `sandbox_id` + `version` with a
//! `RETURNING` clause, so a concurrent mutation can never be clobbered: the
//! loser of a race simply gets zero rows back and reports `VersionConflict`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sbx_schemas::{Sandbox, SandboxStatus};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{parse_cursor, SandboxPatch, SandboxStore, ScanPage, StoreError};

const ALL_COLUMNS: &str = "sandbox_id, name, external_id, status, allocated_to_track, \
                           allocated_at, expires_at, deletion_requested_at, last_seen_at, version";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a bounded pool. `statement_timeout` caps both connection
    /// acquisition and individual statements.
    pub async fn connect(url: &str, statement_timeout: Duration) -> Result<Self, StoreError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| StoreError::Unavailable(format!("invalid database url: {e}")))?
            .options([(
                "statement_timeout",
                statement_timeout.as_millis().to_string(),
            )]);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(statement_timeout)
            .connect_with(options)
            .await
            .map_err(transport)?;

        Ok(Self { pool })
    }

    /// Run embedded migrations (creates `sandbox_pool` and its indexes).
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migrate failed: {e}")))
    }
}

fn transport(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn row_to_sandbox(row: &PgRow) -> Result<Sandbox, StoreError> {
    let status_raw: String = row.try_get("status").map_err(transport)?;
    let status = SandboxStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Unavailable(format!("corrupt status value: {status_raw}")))?;

    Ok(Sandbox {
        sandbox_id: row.try_get("sandbox_id").map_err(transport)?,
        name: row.try_get("name").map_err(transport)?,
        external_id: row.try_get("external_id").map_err(transport)?,
        status,
        allocated_to_track: row.try_get("allocated_to_track").map_err(transport)?,
        allocated_at: row.try_get("allocated_at").map_err(transport)?,
        expires_at: row.try_get("expires_at").map_err(transport)?,
        deletion_requested_at: row.try_get("deletion_requested_at").map_err(transport)?,
        last_seen_at: row.try_get("last_seen_at").map_err(transport)?,
        version: row.try_get("version").map_err(transport)?,
    })
}

#[async_trait]
impl SandboxStore for PgStore {
    async fn get(&self, sandbox_id: Uuid) -> Result<Option<Sandbox>, StoreError> {
        let row = sqlx::query(&format!(
            "select {ALL_COLUMNS} from sandbox_pool where sandbox_id = $1"
        ))
        .bind(sandbox_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        row.as_ref().map(row_to_sandbox).transpose()
    }

    async fn put_if_absent(&self, row: &Sandbox) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            insert into sandbox_pool (
              sandbox_id, name, external_id, status, allocated_to_track,
              allocated_at, expires_at, deletion_requested_at, last_seen_at, version
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(row.sandbox_id)
        .bind(&row.name)
        .bind(&row.external_id)
        .bind(row.status.as_str())
        .bind(&row.allocated_to_track)
        .bind(row.allocated_at)
        .bind(row.expires_at)
        .bind(row.deletion_requested_at)
        .bind(row.last_seen_at)
        .bind(row.version)
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict),
            Err(e) => Err(transport(e)),
        }
    }

    async fn update_if(
        &self,
        sandbox_id: Uuid,
        expected_version: i64,
        patch: &SandboxPatch,
    ) -> Result<Sandbox, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            update sandbox_pool
               set name = $3,
                   status = $4,
                   allocated_to_track = $5,
                   allocated_at = $6,
                   expires_at = $7,
                   deletion_requested_at = $8,
                   last_seen_at = $9,
                   version = version + 1
             where sandbox_id = $1
               and version = $2
            returning {ALL_COLUMNS}
            "#
        ))
        .bind(sandbox_id)
        .bind(expected_version)
        .bind(&patch.name)
        .bind(patch.status.as_str())
        .bind(&patch.allocated_to_track)
        .bind(patch.allocated_at)
        .bind(patch.expires_at)
        .bind(patch.deletion_requested_at)
        .bind(patch.last_seen_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        match row {
            Some(row) => row_to_sandbox(&row),
            // Zero rows: the key is gone, or the version moved. Disambiguate
            // with a primary-key read.
            None => match self.get(sandbox_id).await? {
                Some(_) => Err(StoreError::VersionConflict),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn delete_if(&self, sandbox_id: Uuid, expected_version: i64) -> Result<(), StoreError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            delete from sandbox_pool
             where sandbox_id = $1
               and version = $2
            returning sandbox_id
            "#,
        )
        .bind(sandbox_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(transport)?;

        match row {
            Some(_) => Ok(()),
            None => match self.get(sandbox_id).await? {
                Some(_) => Err(StoreError::VersionConflict),
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn scan_by_status(
        &self,
        status: SandboxStatus,
        limit: i64,
    ) -> Result<Vec<Sandbox>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            select {ALL_COLUMNS}
              from sandbox_pool
             where status = $1
             order by sandbox_id
             limit $2
            "#
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        rows.iter().map(row_to_sandbox).collect()
    }

    async fn paged_scan(
        &self,
        filter: Option<SandboxStatus>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<ScanPage, StoreError> {
        let after = parse_cursor(cursor)?;
        let rows = sqlx::query(&format!(
            r#"
            select {ALL_COLUMNS}
              from sandbox_pool
             where ($1::uuid is null or sandbox_id > $1)
               and ($2::text is null or status = $2)
             order by sandbox_id
             limit $3
            "#
        ))
        .bind(after)
        .bind(filter.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(transport)?;

        let items: Vec<Sandbox> = rows.iter().map(row_to_sandbox).collect::<Result<_, _>>()?;
        let next_cursor = if items.len() as i64 == limit && limit > 0 {
            items.last().map(|r| r.sandbox_id.to_string())
        } else {
            None
        };
        Ok(ScanPage { items, next_cursor })
    }
}
