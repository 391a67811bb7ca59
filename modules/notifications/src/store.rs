use crate::models::NotificationTemplate;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_consumer::{StoreError, TenantResourceStore};
use sqlx::PgPool;
use uuid::Uuid;

/// `notification_templates` table
#[derive(Clone)]
pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantResourceStore for PgTemplateStore {
    type Resource = NotificationTemplate;

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./db/migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn has_resources(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notification_templates WHERE tenant_id = $1)",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_all(&self, resources: &[NotificationTemplate]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for template in resources {
            let result = sqlx::query(
                r#"
                INSERT INTO notification_templates
                    (id, tenant_id, code, channel, subject, body, is_deleted, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (tenant_id, code) DO NOTHING
                "#,
            )
            .bind(template.id)
            .bind(template.tenant_id)
            .bind(&template.code)
            .bind(&template.channel)
            .bind(&template.subject)
            .bind(&template.body)
            .bind(template.is_deleted)
            .bind(template.created_at)
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
            UPDATE notification_templates
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

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<NotificationTemplate>, StoreError> {
        let rows = sqlx::query_as::<_, NotificationTemplate>(
            r#"
            SELECT id, tenant_id, code, channel, subject, body, is_deleted, created_at, deleted_at
            FROM notification_templates
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
