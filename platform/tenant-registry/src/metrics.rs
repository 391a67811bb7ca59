//! Prometheus counters for the outbox relay

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    published: IntCounter,
    retried: IntCounter,
    parked: IntCounter,
    deferred: IntCounter,
    purged: IntCounter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayMetricsSnapshot {
    pub published: u64,
    pub retried: u64,
    pub parked: u64,
    pub deferred: u64,
    pub purged: u64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let records_total = IntCounterVec::new(
            Opts::new("tenant_outbox_records_total", "Outbox records handled by the relay"),
            &["outcome"], // published|retry|parked|deferred|purged
        )
        .expect("metric");

        registry
            .register(Box::new(records_total.clone()))
            .expect("register");

        Self {
            registry,
            published: records_total.with_label_values(&["published"]),
            retried: records_total.with_label_values(&["retry"]),
            parked: records_total.with_label_values(&["parked"]),
            deferred: records_total.with_label_values(&["deferred"]),
            purged: records_total.with_label_values(&["purged"]),
        }
    }

    pub(crate) fn record_published(&self) {
        self.published.inc();
    }

    pub(crate) fn record_retry(&self) {
        self.retried.inc();
    }

    pub(crate) fn record_parked(&self) {
        self.parked.inc();
    }

    pub(crate) fn record_deferred(&self, count: usize) {
        self.deferred.inc_by(count as u64);
    }

    pub(crate) fn record_purged(&self, count: u64) {
        self.purged.inc_by(count);
    }

    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            published: self.published.get(),
            retried: self.retried.get(),
            parked: self.parked.get(),
            deferred: self.deferred.get(),
            purged: self.purged.get(),
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RelayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RelayMetrics").field(&self.snapshot()).finish()
    }
}

/// `GET /metrics` for the relay counters
pub fn metrics_router(metrics: Arc<RelayMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<RelayMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")),
    }
}
