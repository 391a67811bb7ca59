//! Decode a broker body and dispatch it to the service's handler
//!
//! Routing is a closed table over [`EventKind`]; an `EventType` outside it
//! is logged and dropped rather than treated as an error.

use crate::handler::{EventContext, TenantEventHandler};
use crate::idempotency::{IdempotencyLedger, LedgerEntry, LedgerError};
use crate::metrics::ConsumerMetrics;
use event_bus::{BusError, EventKind, IntegrationEnvelope, TenantEvent};
use std::sync::Arc;

/// What happened to a message that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Handled(EventKind),
    /// The ledger already holds this delivery; the handler was not called
    Duplicate(EventKind),
    UnknownType(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The body or payload could not be decoded. Redelivery cannot fix this.
    #[error("failed to decode message: {0}")]
    Decode(#[from] BusError),

    #[error("{service} failed to handle {event_type} for tenant {tenant_id}: {source}")]
    Handler {
        service: String,
        event_type: &'static str,
        tenant_id: uuid::Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl RouteError {
    /// Whether delivering the same message again could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RouteError::Decode(_))
    }
}

pub struct EventRouter {
    handler: Arc<dyn TenantEventHandler>,
    ledger: Option<Arc<dyn IdempotencyLedger>>,
    metrics: Arc<ConsumerMetrics>,
}

impl EventRouter {
    pub fn new(handler: Arc<dyn TenantEventHandler>) -> Self {
        let metrics = Arc::new(ConsumerMetrics::new(handler.service_name()));
        Self {
            handler,
            ledger: None,
            metrics,
        }
    }

    /// Skip deliveries the ledger has already seen
    pub fn with_ledger(mut self, ledger: Arc<dyn IdempotencyLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ConsumerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    pub fn service_name(&self) -> &str {
        self.handler.service_name()
    }

    pub async fn route(&self, body: &[u8]) -> Result<RouteOutcome, RouteError> {
        let envelope = IntegrationEnvelope::from_slice(body).inspect_err(|_| self.metrics.record_malformed())?;

        let Some(kind) = EventKind::from_type_name(&envelope.event_type) else {
            self.metrics.record_unknown_type();
            tracing::warn!(
                service = self.service_name(),
                event_type = %envelope.event_type,
                correlation_id = %envelope.correlation_id,
                "Unhandled event type, dropping"
            );
            return Ok(RouteOutcome::UnknownType(envelope.event_type));
        };

        let event = TenantEvent::decode(kind, &envelope.payload).inspect_err(|_| self.metrics.record_malformed())?;
        let ctx = EventContext::from_envelope(&envelope);

        if let Some(ledger) = &self.ledger {
            if ledger.is_processed(&ctx.idempotency_key).await? {
                self.metrics.record_duplicate();
                tracing::debug!(
                    service = self.service_name(),
                    event_type = kind.type_name(),
                    tenant_id = %event.tenant_id(),
                    correlation_id = %ctx.correlation_id,
                    "Event already processed, skipping"
                );
                return Ok(RouteOutcome::Duplicate(kind));
            }
        }

        self.dispatch(&event, &ctx).await.map_err(|source| {
            self.metrics.record_handler_failure();
            RouteError::Handler {
                service: self.service_name().to_string(),
                event_type: kind.type_name(),
                tenant_id: event.tenant_id(),
                source,
            }
        })?;

        if let Some(ledger) = &self.ledger {
            let entry = LedgerEntry::for_envelope(&envelope, ctx.idempotency_key.clone());
            ledger.mark_processed(&entry).await?;
        }

        self.metrics.record_processed();
        tracing::info!(
            service = self.service_name(),
            event_type = kind.type_name(),
            tenant_id = %event.tenant_id(),
            correlation_id = %ctx.correlation_id,
            source_service = %ctx.source_service,
            "Event processed successfully"
        );

        Ok(RouteOutcome::Handled(kind))
    }

    async fn dispatch(&self, event: &TenantEvent, ctx: &EventContext) -> anyhow::Result<()> {
        match event {
            TenantEvent::Created(e) => self.handler.on_tenant_created(e, ctx).await,
            TenantEvent::Updated(e) => self.handler.on_tenant_updated(e, ctx).await,
            TenantEvent::Deleted(e) => self.handler.on_tenant_deleted(e, ctx).await,
        }
    }
}
