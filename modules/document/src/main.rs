use event_consumer::{metrics_router, spawn_consumer, ConsumerSource, LoopPolicies};
use document_rs::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
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
    let router = document_rs::build_router(config.database_url.as_deref()).await?;
    let metrics = router.metrics().clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(
        ConsumerSource::from_config(&config.bus),
        Arc::new(router),
        LoopPolicies::default(),
        shutdown_rx,
    );

    let app = document_rs::health_router().merge(metrics_router(metrics)).layer(
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Document module listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    consumer.await??;
    Ok(())
}
