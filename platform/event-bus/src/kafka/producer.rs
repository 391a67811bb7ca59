use super::KafkaSettings;
use crate::{BackendCapabilities, BusError, BusResult, EventPublisher, IntegrationEnvelope, PublishReceipt};
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Kafka producer for integration envelopes
///
/// A publish returns only after the broker acknowledged the record on all
/// in-sync replicas. Retries are handled inside librdkafka with a fixed
/// backoff; once they are exhausted the error is returned to the caller.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    source_service: String,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(settings: &KafkaSettings, source_service: &str) -> BusResult<Self> {
        let producer: FutureProducer = settings
            .producer_config()
            .create()
            .map_err(|e| BusError::ConfigError(format!("failed to create Kafka producer: {}", e)))?;

        Ok(Self {
            producer,
            topic: settings.topic.clone(),
            source_service: source_service.to_string(),
            delivery_timeout: settings.delivery_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt> {
        let topic = destination.unwrap_or(&self.topic);
        let payload = envelope.to_vec()?;
        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let record = FutureRecord::to(topic).key(&key).payload(&payload);

        match self
            .producer
            .send(record, Timeout::After(self.delivery_timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    event_type = %envelope.event_type,
                    correlation_id = %envelope.correlation_id,
                    "Published event to Kafka"
                );
                Ok(PublishReceipt {
                    destination: topic.to_string(),
                    partition: Some(partition),
                    offset: Some(offset),
                    receivers: None,
                })
            }
            Err((err, _message)) => {
                tracing::error!(
                    topic = %topic,
                    event_type = %envelope.event_type,
                    correlation_id = %envelope.correlation_id,
                    error = %err,
                    "Kafka publish failed after retries"
                );
                Err(BusError::PublishError {
                    destination: topic.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::DURABLE_LOG
    }

    fn source_service(&self) -> &str {
        &self.source_service
    }

    fn name(&self) -> &str {
        "kafka"
    }
}
