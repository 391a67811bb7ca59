//! Transactional outbox and relay
//!
//! Tenant events are encoded and written as outbox rows in the same commit
//! as the tenant change. [`OutboxRelay`] publishes pending rows in order and
//! marks each one published only after the broker confirmed it. Rows that
//! keep failing are parked as `failed` after `max_attempts`; a parked row
//! holds back every later row with the same partition key until it is
//! requeued. Published rows are purged once older than the retention window.

use crate::metrics::RelayMetrics;
use crate::store::{OutboxStore, StoreError};
use chrono::{DateTime, Utc};
use event_bus::{EventPublisher, IntegrationEnvelope, IntegrationEvent, TenantEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(OutboxStatus::Pending),
            "published" => Some(OutboxStatus::Published),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub event_type: String,
    pub partition_key: String,
    /// Envelope JSON exactly as it will go on the wire
    pub envelope: String,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub status: OutboxStatus,
}

impl OutboxRecord {
    /// Encode `event` now, so the stored envelope keeps its timestamp and
    /// correlation id across relay retries
    pub fn for_event(event: &TenantEvent, source_service: &str) -> event_bus::BusResult<Self> {
        let envelope = event_bus::encode(event, source_service)?;
        Ok(Self {
            id: Uuid::new_v4(),
            event_type: envelope.event_type.clone(),
            partition_key: event
                .partition_key()
                .unwrap_or_else(|| event.tenant_id().to_string()),
            envelope: envelope.to_json()?,
            created_at: envelope.timestamp,
            published_at: None,
            attempts: 0,
            last_error: None,
            status: OutboxStatus::Pending,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
    /// Held back because an earlier record with the same key failed in this batch
    pub deferred: usize,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub batch_size: i64,
    pub max_attempts: i32,
    pub poll_interval: Duration,
    /// How long published rows are kept before the sweep deletes them
    pub published_retention: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_attempts: 5,
            poll_interval: Duration::from_millis(1000),
            published_retention: chrono::Duration::days(7),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    settings: RelaySettings,
    metrics: Arc<RelayMetrics>,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>, settings: RelaySettings) -> Self {
        Self {
            store,
            publisher,
            settings,
            metrics: Arc::new(RelayMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Publish one batch of pending records
    pub async fn relay_once(&self) -> Result<RelayReport, StoreError> {
        let records = self.store.fetch_pending(self.settings.batch_size).await?;
        let mut report = RelayReport::default();
        let mut blocked_keys: HashSet<String> = HashSet::new();

        for record in records {
            if blocked_keys.contains(&record.partition_key) {
                report.deferred += 1;
                continue;
            }

            match self.publish(&record).await {
                Ok(()) => {
                    self.store.mark_published(record.id, Utc::now()).await?;
                    report.published += 1;
                    self.metrics.record_published();
                    tracing::debug!(
                        outbox_id = %record.id,
                        event_type = %record.event_type,
                        "Outbox record published"
                    );
                }
                Err(e) => {
                    let status = self
                        .store
                        .record_failure(record.id, &e, self.settings.max_attempts)
                        .await?;
                    blocked_keys.insert(record.partition_key.clone());
                    report.failed += 1;

                    if status == OutboxStatus::Failed {
                        self.metrics.record_parked();
                        tracing::error!(
                            outbox_id = %record.id,
                            event_type = %record.event_type,
                            attempts = record.attempts + 1,
                            error = %e,
                            "Outbox record failed permanently"
                        );
                    } else {
                        self.metrics.record_retry();
                        tracing::warn!(
                            outbox_id = %record.id,
                            event_type = %record.event_type,
                            attempts = record.attempts + 1,
                            error = %e,
                            "Outbox publish failed, will retry"
                        );
                    }
                }
            }
        }

        self.metrics.record_deferred(report.deferred);
        Ok(report)
    }

    /// Release a parked partition key so its records are relayed again
    pub async fn requeue_failed(&self, partition_key: &str) -> Result<u64, StoreError> {
        let requeued = self.store.requeue_failed(partition_key).await?;
        tracing::info!(partition_key = %partition_key, requeued = requeued, "Requeued parked outbox records");
        Ok(requeued)
    }

    /// Delete published rows older than the retention window
    pub async fn purge_published(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - self.settings.published_retention;
        let purged = self.store.purge_published(cutoff).await?;
        self.metrics.record_purged(purged);
        if purged > 0 {
            tracing::info!(purged = purged, cutoff = %cutoff, "Purged published outbox records");
        }
        Ok(purged)
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<(), String> {
        let envelope =
            IntegrationEnvelope::from_slice(record.envelope.as_bytes()).map_err(|e| e.to_string())?;
        self.publisher
            .publish_envelope(&envelope, Some(&record.partition_key), None)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Poll until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            backend = self.publisher.name(),
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Starting outbox relay"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sweep.tick() => {
                    if let Err(e) = self.purge_published().await {
                        tracing::error!(error = %e, "Outbox retention sweep failed");
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            tick_count += 1;

            match self.relay_once().await {
                Ok(report) if report.published > 0 || report.failed > 0 => {
                    tracing::info!(
                        tick = tick_count,
                        published = report.published,
                        failed = report.failed,
                        deferred = report.deferred,
                        "Outbox relay tick"
                    );
                }
                Ok(_) => {
                    if tick_count <= 3 || tick_count % 60 == 0 {
                        tracing::debug!(tick = tick_count, "Outbox empty");
                    }
                }
                Err(e) => {
                    tracing::error!(tick = tick_count, error = %e, "Outbox relay error");
                }
            }
        }

        tracing::info!("Outbox relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::TenantCreated;

    #[test]
    fn test_record_keeps_encoded_envelope() {
        let tenant = Uuid::new_v4();
        let event = TenantEvent::from(TenantCreated::new(tenant, "ABC", "Agency"));
        let record = OutboxRecord::for_event(&event, "tenant-service").unwrap();

        assert_eq!(record.event_type, "TenantCreated");
        assert_eq!(record.partition_key, tenant.to_string());
        assert_eq!(record.status, OutboxStatus::Pending);

        let envelope = IntegrationEnvelope::from_slice(record.envelope.as_bytes()).unwrap();
        assert_eq!(envelope.source_service, "tenant-service");
        assert_eq!(envelope.timestamp, record.created_at);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [OutboxStatus::Pending, OutboxStatus::Published, OutboxStatus::Failed] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("sent"), None);
    }
}
