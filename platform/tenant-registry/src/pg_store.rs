//! Postgres-backed tenant and outbox store

use crate::outbox::{OutboxRecord, OutboxStatus};
use crate::store::{OutboxStore, StoreError, TenantStore};
use crate::tenant::Tenant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct TenantRow {
    id: Uuid,
    agency_code: String,
    name: String,
    contact_email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant::restore(
            row.id,
            row.agency_code,
            row.name,
            row.contact_email,
            row.created_at,
            row.updated_at,
            row.deleted_at,
        )
    }
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    partition_key: String,
    envelope: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: row.id,
            event_type: row.event_type,
            partition_key: row.partition_key,
            envelope: row.envelope,
            created_at: row.created_at,
            published_at: row.published_at,
            attempts: row.attempts,
            last_error: row.last_error,
            status: OutboxStatus::parse(&row.status).unwrap_or(OutboxStatus::Failed),
        }
    }
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./db/migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const TENANT_COLUMNS: &str =
    "id, agency_code, name, contact_email, created_at, updated_at, deleted_at";

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {} FROM tenants WHERE id = $1",
            TENANT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tenant::from))
    }

    async fn find_by_agency_code(&self, agency_code: &str) -> Result<Option<Tenant>, StoreError> {
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT {} FROM tenants WHERE agency_code = $1",
            TENANT_COLUMNS
        ))
        .bind(agency_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Tenant::from))
    }

    async fn commit(&self, tenants: &[Tenant], outbox: &[OutboxRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for tenant in tenants {
            let result = sqlx::query(
                r#"
                INSERT INTO tenants
                    (id, agency_code, name, contact_email, created_at, updated_at, deleted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO UPDATE SET
                    name = EXCLUDED.name,
                    contact_email = EXCLUDED.contact_email,
                    updated_at = EXCLUDED.updated_at,
                    deleted_at = EXCLUDED.deleted_at
                "#,
            )
            .bind(tenant.id)
            .bind(&tenant.agency_code)
            .bind(&tenant.name)
            .bind(&tenant.contact_email)
            .bind(tenant.created_at)
            .bind(tenant.updated_at)
            .bind(tenant.deleted_at)
            .execute(&mut *tx)
            .await;

            if let Err(e) = result {
                if is_unique_violation(&e) {
                    return Err(StoreError::DuplicateAgencyCode(tenant.agency_code.clone()));
                }
                return Err(e.into());
            }
        }

        for record in outbox {
            sqlx::query(
                r#"
                INSERT INTO tenant_outbox
                    (id, event_type, partition_key, envelope, status, attempts, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id)
            .bind(&record.event_type)
            .bind(&record.partition_key)
            .bind(&record.envelope)
            .bind(record.status.as_str())
            .bind(record.attempts)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            tenants = tenants.len(),
            outbox = outbox.len(),
            "Tenant changes committed"
        );
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgTenantStore {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT o.id, o.event_type, o.partition_key, o.envelope, o.status, o.attempts,
                   o.last_error, o.created_at, o.published_at
            FROM tenant_outbox o
            WHERE o.status = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM tenant_outbox f
                  WHERE f.partition_key = o.partition_key
                    AND f.status = 'failed'
                    AND f.seq < o.seq
              )
            ORDER BY o.seq ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE tenant_outbox
            SET status = 'published', published_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str, max_attempts: i32) -> Result<OutboxStatus, StoreError> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE tenant_outbox
            SET attempts = attempts + 1,
                last_error = $2,
                status = CASE WHEN attempts + 1 >= $3 THEN 'failed' ELSE status END
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status
            .as_deref()
            .and_then(OutboxStatus::parse)
            .unwrap_or(OutboxStatus::Failed))
    }

    async fn requeue_failed(&self, partition_key: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tenant_outbox
            SET status = 'pending', attempts = 0
            WHERE partition_key = $1 AND status = 'failed'
            "#,
        )
        .bind(partition_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_published(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM tenant_outbox
            WHERE status = 'published' AND published_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}
