//! Tenant lifecycle handling for the license service

use crate::config::SERVICE_NAME;
use crate::models::{default_license_types, LicenseType};
use crate::store::PgLicenseTypeStore;
use event_bus::TenantCreated;
use event_consumer::{
    EventRouter, InMemoryLedger, InMemoryResourceStore, PgLedger, ProvisioningHandler,
    TenantResourceStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub type LicenseTypeHandler<S> = ProvisioningHandler<S, fn(&TenantCreated) -> Vec<LicenseType>>;

/// Seeds [`default_license_types`] on `TenantCreated`, soft-deletes them on `TenantDeleted`
pub fn license_type_handler<S>(store: S) -> LicenseTypeHandler<S>
where
    S: TenantResourceStore<Resource = LicenseType>,
{
    ProvisioningHandler::new(
        SERVICE_NAME,
        "license types",
        store,
        default_license_types as fn(&TenantCreated) -> Vec<LicenseType>,
    )
}

/// Build the event router on Postgres, or on in-memory stores without a database
pub async fn build_router(database_url: Option<&str>) -> anyhow::Result<EventRouter> {
    let router = match database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

            let store = PgLicenseTypeStore::new(pool.clone());
            tracing::info!("Running migrations...");
            store.ensure_schema().await?;

            EventRouter::new(Arc::new(license_type_handler(store)))
                .with_ledger(Arc::new(PgLedger::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, license types are kept in memory");
            EventRouter::new(Arc::new(license_type_handler(InMemoryResourceStore::new())))
                .with_ledger(Arc::new(InMemoryLedger::new()))
        }
    };

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_router_serves_license_service() {
        let router = build_router(None).await.unwrap();
        assert_eq!(router.service_name(), SERVICE_NAME);
    }
}
