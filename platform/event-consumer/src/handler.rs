//! The per-service tenant event handler contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{IntegrationEnvelope, TenantCreated, TenantDeleted, TenantUpdated};

/// Envelope metadata handed to every handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub event_type: String,
    pub correlation_id: String,
    pub source_service: String,
    pub published_at: DateTime<Utc>,
    /// Ledger key for this delivery (see [`crate::idempotency_key`])
    pub idempotency_key: String,
}

impl EventContext {
    pub fn from_envelope(envelope: &IntegrationEnvelope) -> Self {
        Self {
            event_type: envelope.event_type.clone(),
            correlation_id: envelope.correlation_id.clone(),
            source_service: envelope.source_service.clone(),
            published_at: envelope.timestamp,
            idempotency_key: crate::idempotency_key(envelope),
        }
    }
}

/// Reaction of one downstream service to tenant lifecycle events
///
/// Every method must be idempotent: the same event can arrive more than
/// once (Kafka redelivery, outbox relay retries). Implementations commit
/// their own changes before returning `Ok`. Returning `Err` asks the
/// consumer loop to retry where the backend allows it.
#[async_trait]
pub trait TenantEventHandler: Send + Sync {
    /// Service name for logs and the idempotency ledger
    fn service_name(&self) -> &str;

    async fn on_tenant_created(&self, event: &TenantCreated, ctx: &EventContext) -> anyhow::Result<()>;

    /// Tenant renames and contact changes don't touch provisioned data
    async fn on_tenant_updated(&self, event: &TenantUpdated, ctx: &EventContext) -> anyhow::Result<()> {
        tracing::debug!(
            service = self.service_name(),
            tenant_id = %event.tenant_id,
            correlation_id = %ctx.correlation_id,
            "TenantUpdated requires no action"
        );
        Ok(())
    }

    async fn on_tenant_deleted(&self, event: &TenantDeleted, ctx: &EventContext) -> anyhow::Result<()>;
}
