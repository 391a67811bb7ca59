//! # Document Service
//!
//! Seeds each agency's document categories on `TenantCreated` and
//! soft-deletes them on `TenantDeleted`.

pub mod config;
pub mod handlers;
pub mod models;
pub mod store;

pub use handlers::{build_router, category_handler, CategoryHandler};
pub use models::{default_document_categories, DocumentCategory};
pub use store::PgCategoryStore;

use axum::{routing::get, Json, Router};

pub fn health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "document",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
