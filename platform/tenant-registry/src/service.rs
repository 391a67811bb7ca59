//! Tenant lifecycle operations
//!
//! Each operation loads or creates the aggregate, applies the change and
//! saves it through a [`UnitOfWork`], which dispatches the raised events.

use crate::store::{StoreError, TenantStore};
use crate::tenant::{Tenant, TenantError};
use crate::unit_of_work::{CommitError, DispatchMode, UnitOfWork};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateTenant {
    pub agency_code: String,
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
}

pub struct TenantService<S: TenantStore + ?Sized> {
    store: Arc<S>,
    source_service: String,
    mode: DispatchMode,
}

impl<S: TenantStore + ?Sized> TenantService<S> {
    pub fn new(store: Arc<S>, source_service: impl Into<String>, mode: DispatchMode) -> Self {
        Self {
            store,
            source_service: source_service.into(),
            mode,
        }
    }

    pub async fn create_tenant(&self, request: CreateTenant) -> Result<Tenant, ServiceError> {
        let tenant = Tenant::create(&request.agency_code, &request.name, request.contact_email)?;

        if self.store.find_by_agency_code(&tenant.agency_code).await?.is_some() {
            return Err(TenantError::DuplicateAgencyCode(tenant.agency_code).into());
        }

        let tenant = self.save(tenant).await?;
        tracing::info!(
            tenant_id = %tenant.id,
            agency_code = %tenant.agency_code,
            "Tenant created"
        );
        Ok(tenant)
    }

    pub async fn update_tenant(
        &self,
        id: Uuid,
        name: &str,
        contact_email: Option<String>,
    ) -> Result<Tenant, ServiceError> {
        let mut tenant = self.load(id).await?;
        tenant.update(name, contact_email)?;

        let tenant = self.save(tenant).await?;
        tracing::info!(tenant_id = %tenant.id, "Tenant updated");
        Ok(tenant)
    }

    pub async fn delete_tenant(&self, id: Uuid) -> Result<Tenant, ServiceError> {
        let mut tenant = self.load(id).await?;
        tenant.delete()?;

        let tenant = self.save(tenant).await?;
        tracing::info!(tenant_id = %tenant.id, "Tenant deleted");
        Ok(tenant)
    }

    pub async fn get_tenant(&self, id: Uuid) -> Result<Tenant, ServiceError> {
        self.load(id).await
    }

    async fn load(&self, id: Uuid) -> Result<Tenant, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TenantError::NotFound(id).into())
    }

    async fn save(&self, tenant: Tenant) -> Result<Tenant, ServiceError> {
        let mut uow = UnitOfWork::new(&*self.store, &self.source_service, self.mode.clone());
        uow.track(tenant);

        let result = uow.save_changes().await;
        let saved = uow.tenants()[0].clone();
        match result {
            Ok(_) => Ok(saved),
            Err(CommitError::Store(StoreError::DuplicateAgencyCode(code))) => {
                Err(TenantError::DuplicateAgencyCode(code).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
