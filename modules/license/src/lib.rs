//! # License Service
//!
//! Consumes tenant lifecycle events and keeps each agency's license types in
//! step: three defaults on `TenantCreated`, soft-deleted on `TenantDeleted`.

pub mod config;
pub mod handlers;
pub mod models;
pub mod store;

pub use handlers::{build_router, license_type_handler, LicenseTypeHandler};
pub use models::{default_license_types, LicenseType};
pub use store::PgLicenseTypeStore;

use axum::{routing::get, Json, Router};

/// `GET /api/health`
pub fn health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "license",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
