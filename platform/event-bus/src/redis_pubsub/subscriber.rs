use super::RedisSettings;
use crate::{BusError, BusMessage, BusResult, PubSubConnector, PubSubSession};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;

/// Opens Redis subscriptions for the subscriber loop
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    pub fn new(settings: &RedisSettings) -> BusResult<Self> {
        Ok(Self {
            client: settings.client()?,
        })
    }
}

#[async_trait]
impl PubSubConnector for RedisConnector {
    async fn connect(&self, channel: &str) -> BusResult<Box<dyn PubSubSession>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        // A subscribed connection only carries pushes; PING goes over a sibling connection
        let control = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        let messages = pubsub
            .into_on_message()
            .map(|msg| BusMessage::new(msg.get_channel_name().to_string(), msg.get_payload_bytes().to_vec()))
            .boxed();

        Ok(Box::new(RedisSession { messages, control }))
    }
}

struct RedisSession {
    messages: BoxStream<'static, BusMessage>,
    control: MultiplexedConnection,
}

#[async_trait]
impl PubSubSession for RedisSession {
    async fn next_message(&mut self) -> Option<BusMessage> {
        self.messages.next().await
    }

    async fn ping(&mut self) -> BusResult<()> {
        let pong: String = redis::cmd("PING")
            .query_async(&mut self.control)
            .await
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        if pong != "PONG" {
            return Err(BusError::ConnectionError(format!("unexpected PING reply '{}'", pong)));
        }
        Ok(())
    }
}
