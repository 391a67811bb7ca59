//! In-memory pub/sub with Redis Pub/Sub semantics, for testing and development

use crate::{
    BackendCapabilities, BusError, BusMessage, BusResult, EventPublisher, IntegrationEnvelope,
    PubSubConnector, PubSubSession, PublishReceipt,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Fire-and-forget pub/sub using in-memory channels
///
/// Mirrors Redis Pub/Sub: no persistence, no replay, and a message
/// published while nobody is subscribed is silently dropped. Publishing
/// reports how many subscribers received the message.
///
/// Also implements [`PubSubConnector`] so the subscriber loop can run
/// against it, including simulated connection loss via
/// [`InMemoryBus::sever_connections`].
///
/// # Example
/// ```rust
/// use event_bus::{EventPublisher, InMemoryBus, PubSubConnector, TenantDeleted};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new("tenant-events", "tenant-service");
/// let mut session = bus.connect("tenant-events").await?;
///
/// let envelope = event_bus::encode(&TenantDeleted::new(Uuid::new_v4()), "tenant-service")?;
/// let receipt = bus.publish_envelope(&envelope, None, None).await?;
/// assert_eq!(receipt.receivers, Some(1));
///
/// let msg = session.next_message().await.unwrap();
/// assert_eq!(msg.channel, "tenant-events");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    sender: Arc<broadcast::Sender<BusMessage>>,
    generation: Arc<watch::Sender<u64>>,
    refused_connects: Arc<AtomicU32>,
    channel: String,
    source_service: String,
}

impl InMemoryBus {
    /// Create a bus with a buffer of 1000 messages per subscriber
    pub fn new(channel: impl Into<String>, source_service: impl Into<String>) -> Self {
        Self::with_capacity(channel, source_service, 1000)
    }

    /// Create a bus with a custom per-subscriber buffer size
    ///
    /// Subscribers that fall further behind than `buffer_size` lose the
    /// oldest messages.
    pub fn with_capacity(
        channel: impl Into<String>,
        source_service: impl Into<String>,
        buffer_size: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        let (generation, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
            generation: Arc::new(generation),
            refused_connects: Arc::new(AtomicU32::new(0)),
            channel: channel.into(),
            source_service: source_service.into(),
        }
    }

    /// Drop every open session, as if the server went away
    pub fn sever_connections(&self) {
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Make the next `count` connection attempts fail
    pub fn refuse_next_connects(&self, count: u32) {
        self.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Default channel for publishes without a destination
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Number of currently open sessions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBus {
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        _key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt> {
        let channel = destination.unwrap_or(&self.channel).to_string();
        let msg = BusMessage::new(channel.clone(), envelope.to_vec()?);

        // Err only means there are no receivers, which is not a failure here
        let receivers = self.sender.send(msg).unwrap_or(0);
        if receivers == 0 {
            tracing::debug!(channel = %channel, "Published with no active subscribers");
        }

        Ok(PublishReceipt {
            destination: channel,
            partition: None,
            offset: None,
            receivers: Some(receivers),
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::FIRE_AND_FORGET
    }

    fn source_service(&self) -> &str {
        &self.source_service
    }

    fn name(&self) -> &str {
        "inmemory-pubsub"
    }
}

#[async_trait]
impl PubSubConnector for InMemoryBus {
    async fn connect(&self, channel: &str) -> BusResult<Box<dyn PubSubSession>> {
        let refused = self
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BusError::ConnectionError("connection refused".to_string()));
        }

        Ok(Box::new(InMemorySession {
            receiver: self.sender.subscribe(),
            generation: self.generation.subscribe(),
            channel: channel.to_string(),
            closed: false,
        }))
    }
}

struct InMemorySession {
    receiver: broadcast::Receiver<BusMessage>,
    generation: watch::Receiver<u64>,
    channel: String,
    closed: bool,
}

#[async_trait]
impl PubSubSession for InMemorySession {
    async fn next_message(&mut self) -> Option<BusMessage> {
        if self.closed {
            return None;
        }

        loop {
            tokio::select! {
                _ = self.generation.changed() => {
                    self.closed = true;
                    return None;
                }
                received = self.receiver.recv() => match received {
                    Ok(msg) if msg.channel == self.channel => return Some(msg),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "InMemoryBus subscriber lagged, messages lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.closed = true;
                        return None;
                    }
                }
            }
        }
    }

    async fn ping(&mut self) -> BusResult<()> {
        if self.closed || self.generation.has_changed().unwrap_or(true) {
            self.closed = true;
            return Err(BusError::ConnectionError("connection lost".to_string()));
        }
        Ok(())
    }
}
