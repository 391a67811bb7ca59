//! # Notification Service
//!
//! Gives every new agency a starter set of notification templates and
//! retires them when the agency is deleted.

pub mod config;
pub mod handlers;
pub mod models;
pub mod store;

pub use handlers::{build_router, template_handler, TemplateHandler};
pub use models::{default_notification_templates, NotificationTemplate};
pub use store::PgTemplateStore;

use axum::{routing::get, Json, Router};

pub fn health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "notifications",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
