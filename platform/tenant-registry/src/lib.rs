//! # Tenant Registry
//!
//! Owns the tenant aggregate and is the single publisher of tenant
//! lifecycle events. Changes go through a [`UnitOfWork`]; by default the
//! raised events are staged in the transactional outbox and shipped by the
//! [`OutboxRelay`]. The binary exposes the lifecycle operations over HTTP
//! through [`tenant_router`].

pub mod config;
pub mod metrics;
pub mod outbox;
pub mod pg_store;
pub mod routes;
pub mod service;
pub mod store;
pub mod tenant;
pub mod unit_of_work;

pub use metrics::{metrics_router, RelayMetrics, RelayMetricsSnapshot};
pub use outbox::{OutboxRecord, OutboxRelay, OutboxStatus, RelayReport, RelaySettings};
pub use pg_store::PgTenantStore;
pub use routes::{tenant_router, TenantApi, TenantResponse, UpdateTenant};
pub use service::{CreateTenant, ServiceError, TenantService};
pub use store::{InMemoryTenantStore, OutboxStore, StoreError, TenantStore};
pub use tenant::{AggregateRoot, Tenant, TenantError};
pub use unit_of_work::{CommitError, DispatchMode, SaveOutcome, UnitOfWork};

use axum::{routing::get, Json, Router};

/// `GET /api/health`
pub fn health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "tenant-registry",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
