use super::RedisSettings;
use crate::consumer_retry::{retry_with_backoff, RetryConfig};
use crate::{BackendCapabilities, BusError, BusResult, EventPublisher, IntegrationEnvelope, PublishReceipt};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

/// Redis Pub/Sub publisher
///
/// The multiplexed connection is opened on first publish. Concurrent first
/// publishes wait on the same mutex, so only one of them connects. A failed
/// publish drops the connection and the next call reconnects.
pub struct RedisPublisher {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    channel: String,
    source_service: String,
    connect_retry: RetryConfig,
}

impl RedisPublisher {
    pub fn new(settings: &RedisSettings, source_service: &str) -> BusResult<Self> {
        let connect_retry = if settings.abort_connect {
            RetryConfig::fixed(1, Duration::ZERO)
        } else {
            RetryConfig::fixed(3, Duration::from_millis(500))
        };

        Ok(Self {
            client: settings.client()?,
            connection: Mutex::new(None),
            channel: settings.channel.clone(),
            source_service: source_service.to_string(),
            connect_retry,
        })
    }

    async fn connection(&self) -> BusResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = retry_with_backoff(
            || self.client.get_multiplexed_async_connection(),
            &self.connect_retry,
            "redis_publisher_connect",
        )
        .await
        .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        tracing::info!(channel = %self.channel, "Redis publisher connected");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        _key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt> {
        let channel = destination.unwrap_or(&self.channel);
        let payload = envelope.to_json()?;
        let mut conn = self.connection().await?;

        let receivers: i64 = match conn.publish(channel, payload).await {
            Ok(receivers) => receivers,
            Err(e) => {
                self.reset().await;
                return Err(BusError::PublishError {
                    destination: channel.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if receivers == 0 {
            tracing::debug!(
                channel = %channel,
                event_type = %envelope.event_type,
                "Published to Redis with no active subscribers"
            );
        }

        Ok(PublishReceipt {
            destination: channel.to_string(),
            partition: None,
            offset: None,
            receivers: Some(receivers.max(0) as usize),
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::FIRE_AND_FORGET
    }

    fn source_service(&self) -> &str {
        &self.source_service
    }

    fn name(&self) -> &str {
        "redis"
    }
}
