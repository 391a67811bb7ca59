use crate::config::SERVICE_NAME;
use crate::models::{default_notification_templates, NotificationTemplate};
use crate::store::PgTemplateStore;
use event_bus::TenantCreated;
use event_consumer::{
    EventRouter, InMemoryLedger, InMemoryResourceStore, PgLedger, ProvisioningHandler,
    TenantResourceStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub type TemplateHandler<S> =
    ProvisioningHandler<S, fn(&TenantCreated) -> Vec<NotificationTemplate>>;

pub fn template_handler<S>(store: S) -> TemplateHandler<S>
where
    S: TenantResourceStore<Resource = NotificationTemplate>,
{
    ProvisioningHandler::new(
        SERVICE_NAME,
        "notification templates",
        store,
        default_notification_templates as fn(&TenantCreated) -> Vec<NotificationTemplate>,
    )
}

pub async fn build_router(database_url: Option<&str>) -> anyhow::Result<EventRouter> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, notification templates are kept in memory");
        return Ok(
            EventRouter::new(Arc::new(template_handler(InMemoryResourceStore::new())))
                .with_ledger(Arc::new(InMemoryLedger::new())),
        );
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

    let store = PgTemplateStore::new(pool.clone());
    tracing::info!("Running migrations...");
    store.ensure_schema().await?;

    Ok(EventRouter::new(Arc::new(template_handler(store))).with_ledger(Arc::new(PgLedger::new(pool))))
}
