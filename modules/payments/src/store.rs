use crate::models::FeeSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_consumer::{StoreError, TenantResourceStore};
use sqlx::PgPool;
use uuid::Uuid;

/// `fee_schedules` table
#[derive(Clone)]
pub struct PgFeeScheduleStore {
    pool: PgPool,
}

impl PgFeeScheduleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantResourceStore for PgFeeScheduleStore {
    type Resource = FeeSchedule;

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./db/migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn has_resources(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM fee_schedules WHERE tenant_id = $1)",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_all(&self, resources: &[FeeSchedule]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for fee in resources {
            let result = sqlx::query(
                r#"
                INSERT INTO fee_schedules
                    (id, tenant_id, code, name, amount_minor, currency, is_deleted, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (tenant_id, code) DO NOTHING
                "#,
            )
            .bind(fee.id)
            .bind(fee.tenant_id)
            .bind(&fee.code)
            .bind(&fee.name)
            .bind(fee.amount_minor)
            .bind(&fee.currency)
            .bind(fee.is_deleted)
            .bind(fee.created_at)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn soft_delete_all(&self, tenant_id: Uuid, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE fee_schedules
            SET is_deleted = TRUE, deleted_at = $2
            WHERE tenant_id = $1 AND NOT is_deleted
            "#,
        )
        .bind(tenant_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<FeeSchedule>, StoreError> {
        let rows = sqlx::query_as::<_, FeeSchedule>(
            r#"
            SELECT id, tenant_id, code, name, amount_minor, currency, is_deleted, created_at, deleted_at
            FROM fee_schedules
            WHERE tenant_id = $1 AND NOT is_deleted
            ORDER BY code
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
