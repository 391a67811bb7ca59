use crate::models::DocumentCategory;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_consumer::{StoreError, TenantResourceStore};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgCategoryStore {
    pool: PgPool,
}

impl PgCategoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantResourceStore for PgCategoryStore {
    type Resource = DocumentCategory;

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./db/migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn has_resources(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM document_categories WHERE tenant_id = $1)",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert_all(&self, resources: &[DocumentCategory]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for category in resources {
            let result = sqlx::query(
                r#"
                INSERT INTO document_categories
                    (id, tenant_id, code, name, retention_days, requires_review, is_deleted, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (tenant_id, code) DO NOTHING
                "#,
            )
            .bind(category.id)
            .bind(category.tenant_id)
            .bind(&category.code)
            .bind(&category.name)
            .bind(category.retention_days)
            .bind(category.requires_review)
            .bind(category.is_deleted)
            .bind(category.created_at)
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
            UPDATE document_categories
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

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<DocumentCategory>, StoreError> {
        let rows = sqlx::query_as::<_, DocumentCategory>(
            r#"
            SELECT id, tenant_id, code, name, retention_days, requires_review, is_deleted,
                   created_at, deleted_at
            FROM document_categories
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
