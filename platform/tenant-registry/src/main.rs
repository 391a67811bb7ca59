use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tenant_registry::config::{Config, DispatchKind, SERVICE_NAME};
use tenant_registry::{
    health_router, metrics_router, tenant_router, DispatchMode, InMemoryTenantStore, OutboxRelay,
    OutboxStore, PgTenantStore, TenantApi, TenantService, TenantStore,
};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;

    let (tenant_store, outbox_store): (Arc<dyn TenantStore>, Arc<dyn OutboxStore>) =
        match &config.database_url {
            Some(database_url) => {
                tracing::info!("Connecting to database...");
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;

                let store = Arc::new(PgTenantStore::new(pool));
                tracing::info!("Running migrations...");
                store.ensure_schema().await?;
                (store.clone() as Arc<dyn TenantStore>, store as Arc<dyn OutboxStore>)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory tenant store");
                let store = Arc::new(InMemoryTenantStore::new());
                (store.clone() as Arc<dyn TenantStore>, store as Arc<dyn OutboxStore>)
            }
        };

    let publisher = config.bus.build_publisher()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (mode, relay) = match config.dispatch {
        DispatchKind::Outbox => {
            let relay = Arc::new(OutboxRelay::new(outbox_store, publisher, config.relay.clone()));
            (DispatchMode::Outbox, Some(relay))
        }
        DispatchKind::Immediate => {
            tracing::info!("Immediate dispatch mode, outbox relay not started");
            (DispatchMode::Immediate(publisher), None)
        }
    };

    let relay_task = relay.clone().map(|relay| {
        tokio::spawn(async move { relay.run(shutdown_rx).await })
    });

    let api = Arc::new(TenantApi {
        tenants: TenantService::new(tenant_store, SERVICE_NAME, mode),
        relay: relay.clone(),
    });

    let mut app = health_router().merge(tenant_router(api));
    if let Some(relay) = &relay {
        app = app.merge(metrics_router(relay.metrics().clone()));
    }
    let app = app.layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Tenant registry listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = relay_task {
        task.await?;
    }

    Ok(())
}
