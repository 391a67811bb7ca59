//! Prometheus counters for one consumer, labelled by service
//!
//! Every [`ConsumerMetrics`] owns its own [`Registry`], so several routers
//! in one process (tests, the e2e harness) never collide on registration.
//! Binaries expose it through [`ConsumerMetrics::render`] on `/metrics`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConsumerMetrics {
    registry: Registry,
    processed: IntCounter,
    duplicates: IntCounter,
    malformed: IntCounter,
    unknown_types: IntCounter,
    handler_failures: IntCounter,
    commits: IntCounter,
    reconnects: IntCounter,
}

/// Point-in-time copy of [`ConsumerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub unknown_types: u64,
    pub handler_failures: u64,
    pub commits: u64,
    pub reconnects: u64,
}

impl ConsumerMetrics {
    pub fn new(service: &str) -> Self {
        let registry = Registry::new();

        let messages_total = IntCounterVec::new(
            Opts::new("tenant_events_consumed_total", "Tenant event messages by outcome"),
            &["service", "outcome"], // processed|duplicate|malformed|unknown_type|handler_failure
        )
        .expect("metric");

        let commits_total = IntCounterVec::new(
            Opts::new("tenant_events_offset_commits_total", "Offsets committed after processing"),
            &["service"],
        )
        .expect("metric");

        let reconnects_total = IntCounterVec::new(
            Opts::new("tenant_events_reconnects_total", "Subscriptions lost or never established"),
            &["service"],
        )
        .expect("metric");

        registry
            .register(Box::new(messages_total.clone()))
            .expect("register");
        registry
            .register(Box::new(commits_total.clone()))
            .expect("register");
        registry
            .register(Box::new(reconnects_total.clone()))
            .expect("register");

        Self {
            registry,
            processed: messages_total.with_label_values(&[service, "processed"]),
            duplicates: messages_total.with_label_values(&[service, "duplicate"]),
            malformed: messages_total.with_label_values(&[service, "malformed"]),
            unknown_types: messages_total.with_label_values(&[service, "unknown_type"]),
            handler_failures: messages_total.with_label_values(&[service, "handler_failure"]),
            commits: commits_total.with_label_values(&[service]),
            reconnects: reconnects_total.with_label_values(&[service]),
        }
    }

    pub(crate) fn record_processed(&self) {
        self.processed.inc();
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.inc();
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed.inc();
    }

    pub(crate) fn record_unknown_type(&self) {
        self.unknown_types.inc();
    }

    pub(crate) fn record_handler_failure(&self) {
        self.handler_failures.inc();
    }

    pub(crate) fn record_commit(&self) {
        self.commits.inc();
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.get(),
            duplicates: self.duplicates.get(),
            malformed: self.malformed.get(),
            unknown_types: self.unknown_types.get(),
            handler_failures: self.handler_failures.get(),
            commits: self.commits.get(),
            reconnects: self.reconnects.get(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every counter
    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl fmt::Debug for ConsumerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConsumerMetrics").field(&self.snapshot()).finish()
    }
}

/// `GET /metrics` for a consumer's counters
pub fn metrics_router(metrics: Arc<ConsumerMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<ConsumerMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")),
    }
}
