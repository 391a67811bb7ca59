//! # Payment Service
//!
//! Maintains each agency's fee schedules from tenant lifecycle events.

pub mod config;
pub mod handlers;
pub mod models;
pub mod store;

pub use handlers::{build_router, fee_schedule_handler, FeeScheduleHandler};
pub use models::{default_fee_schedules, FeeSchedule};
pub use store::PgFeeScheduleStore;

use axum::{routing::get, Json, Router};

pub fn health_router() -> Router {
    Router::new().route("/api/health", get(health))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "module": "payments",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
