use crate::config::SERVICE_NAME;
use crate::models::{default_document_categories, DocumentCategory};
use crate::store::PgCategoryStore;
use event_bus::TenantCreated;
use event_consumer::{
    EventRouter, InMemoryLedger, InMemoryResourceStore, PgLedger, ProvisioningHandler,
    TenantResourceStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub type CategoryHandler<S> =
    ProvisioningHandler<S, fn(&TenantCreated) -> Vec<DocumentCategory>>;

pub fn category_handler<S>(store: S) -> CategoryHandler<S>
where
    S: TenantResourceStore<Resource = DocumentCategory>,
{
    ProvisioningHandler::new(
        SERVICE_NAME,
        "document categories",
        store,
        default_document_categories as fn(&TenantCreated) -> Vec<DocumentCategory>,
    )
}

pub async fn build_router(database_url: Option<&str>) -> anyhow::Result<EventRouter> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, document categories are kept in memory");
        return Ok(
            EventRouter::new(Arc::new(category_handler(InMemoryResourceStore::new())))
                .with_ledger(Arc::new(InMemoryLedger::new())),
        );
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

    let store = PgCategoryStore::new(pool.clone());
    tracing::info!("Running migrations...");
    store.ensure_schema().await?;

    Ok(EventRouter::new(Arc::new(category_handler(store))).with_ledger(Arc::new(PgLedger::new(pool))))
}
