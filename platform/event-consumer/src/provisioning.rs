//! Idempotent seeding and soft-delete of tenant-scoped defaults
//!
//! Each downstream service owns one kind of tenant-scoped resource (license
//! types, notification templates, ...). The lifecycle is the same for all
//! of them: seed defaults on `TenantCreated` unless some already exist,
//! leave them alone on `TenantUpdated`, soft-delete them on `TenantDeleted`.

use crate::handler::{EventContext, TenantEventHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{TenantCreated, TenantDeleted};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// A row owned by one tenant that can be soft-deleted
pub trait TenantResource: Clone + Send + Sync + 'static {
    fn tenant_id(&self) -> Uuid;

    /// Unique within a tenant; used to make seeding idempotent
    fn natural_key(&self) -> &str;

    fn is_active(&self) -> bool;

    fn soft_delete(&mut self, at: DateTime<Utc>);
}

#[async_trait]
pub trait TenantResourceStore: Send + Sync {
    type Resource: TenantResource;

    /// Apply pending schema migrations. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Whether the tenant has any rows, active or deleted
    async fn has_resources(&self, tenant_id: Uuid) -> Result<bool, StoreError>;

    /// Insert in one commit, skipping rows whose natural key already exists.
    /// Returns how many rows were inserted.
    async fn insert_all(&self, resources: &[Self::Resource]) -> Result<u64, StoreError>;

    /// Soft-delete every active row of the tenant in one commit
    async fn soft_delete_all(&self, tenant_id: Uuid, at: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<Self::Resource>, StoreError>;
}

/// In-process store, used by tests and by services started without `DATABASE_URL`
pub struct InMemoryResourceStore<R> {
    rows: Mutex<HashMap<(Uuid, String), R>>,
}

impl<R> Default for InMemoryResourceStore<R> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
        }
    }
}

impl<R: TenantResource> InMemoryResourceStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row of the tenant, including soft-deleted ones
    pub fn all_for(&self, tenant_id: Uuid) -> Vec<R> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.values()
            .filter(|r| r.tenant_id() == tenant_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl<R: TenantResource> TenantResourceStore for InMemoryResourceStore<R> {
    type Resource = R;

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn has_resources(&self, tenant_id: Uuid) -> Result<bool, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.keys().any(|(tenant, _)| *tenant == tenant_id))
    }

    async fn insert_all(&self, resources: &[R]) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0;
        for resource in resources {
            let key = (resource.tenant_id(), resource.natural_key().to_string());
            if let std::collections::hash_map::Entry::Vacant(slot) = rows.entry(key) {
                slot.insert(resource.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn soft_delete_all(&self, tenant_id: Uuid, at: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut deleted = 0;
        for row in rows.values_mut() {
            if row.tenant_id() == tenant_id && row.is_active() {
                row.soft_delete(at);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn list_active(&self, tenant_id: Uuid) -> Result<Vec<R>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows
            .values()
            .filter(|r| r.tenant_id() == tenant_id && r.is_active())
            .cloned()
            .collect())
    }
}

/// [`TenantEventHandler`] that seeds and tears down one resource kind
pub struct ProvisioningHandler<S, F> {
    service: String,
    resource_label: &'static str,
    store: S,
    defaults: F,
}

impl<S, F> ProvisioningHandler<S, F>
where
    S: TenantResourceStore,
    F: Fn(&TenantCreated) -> Vec<S::Resource> + Send + Sync,
{
    /// `defaults` builds the rows a new tenant starts with
    pub fn new(service: impl Into<String>, resource_label: &'static str, store: S, defaults: F) -> Self {
        Self {
            service: service.into(),
            resource_label,
            store,
            defaults,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S, F> TenantEventHandler for ProvisioningHandler<S, F>
where
    S: TenantResourceStore,
    F: Fn(&TenantCreated) -> Vec<S::Resource> + Send + Sync,
{
    fn service_name(&self) -> &str {
        &self.service
    }

    async fn on_tenant_created(&self, event: &TenantCreated, ctx: &EventContext) -> anyhow::Result<()> {
        self.store.ensure_schema().await?;

        if self.store.has_resources(event.tenant_id).await? {
            tracing::info!(
                service = %self.service,
                tenant_id = %event.tenant_id,
                correlation_id = %ctx.correlation_id,
                "Tenant already has {}, skipping seed",
                self.resource_label
            );
            return Ok(());
        }

        let defaults = (self.defaults)(event);
        let inserted = self.store.insert_all(&defaults).await?;

        tracing::info!(
            service = %self.service,
            tenant_id = %event.tenant_id,
            agency_code = %event.agency_code,
            correlation_id = %ctx.correlation_id,
            inserted = inserted,
            "Seeded default {}",
            self.resource_label
        );
        Ok(())
    }

    async fn on_tenant_deleted(&self, event: &TenantDeleted, ctx: &EventContext) -> anyhow::Result<()> {
        let deleted = self
            .store
            .soft_delete_all(event.tenant_id, event.deleted_at)
            .await?;

        tracing::info!(
            service = %self.service,
            tenant_id = %event.tenant_id,
            correlation_id = %ctx.correlation_id,
            deleted = deleted,
            "Soft-deleted {}",
            self.resource_label
        );
        Ok(())
    }
}
