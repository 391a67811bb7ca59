use crate::config::SERVICE_NAME;
use crate::models::{default_fee_schedules, FeeSchedule};
use crate::store::PgFeeScheduleStore;
use event_bus::TenantCreated;
use event_consumer::{
    EventRouter, InMemoryLedger, InMemoryResourceStore, PgLedger, ProvisioningHandler,
    TenantResourceStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

pub type FeeScheduleHandler<S> =
    ProvisioningHandler<S, fn(&TenantCreated) -> Vec<FeeSchedule>>;

pub fn fee_schedule_handler<S>(store: S) -> FeeScheduleHandler<S>
where
    S: TenantResourceStore<Resource = FeeSchedule>,
{
    ProvisioningHandler::new(
        SERVICE_NAME,
        "fee schedules",
        store,
        default_fee_schedules as fn(&TenantCreated) -> Vec<FeeSchedule>,
    )
}

pub async fn build_router(database_url: Option<&str>) -> anyhow::Result<EventRouter> {
    let Some(url) = database_url else {
        tracing::warn!("DATABASE_URL not set, fee schedules are kept in memory");
        return Ok(
            EventRouter::new(Arc::new(fee_schedule_handler(InMemoryResourceStore::new())))
                .with_ledger(Arc::new(InMemoryLedger::new())),
        );
    };

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

    let store = PgFeeScheduleStore::new(pool.clone());
    tracing::info!("Running migrations...");
    store.ensure_schema().await?;

    Ok(EventRouter::new(Arc::new(fee_schedule_handler(store))).with_ledger(Arc::new(PgLedger::new(pool))))
}
