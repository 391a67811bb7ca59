//! # Tenant Event Bus
//!
//! Platform-level messaging for tenant lifecycle facts. The Tenant service
//! publishes `TenantCreated` / `TenantUpdated` / `TenantDeleted`; every
//! downstream service (license, notifications, documents, payments)
//! subscribes and provisions its own tenant-scoped data.
//!
//! ## Backends
//!
//! | Backend            | Replay | Ordering (per key) | Use                     |
//! |--------------------|--------|--------------------|-------------------------|
//! | [`KafkaPublisher`] | yes    | yes                | production              |
//! | [`RedisPublisher`] | no     | no                 | production, lightweight |
//! | [`InMemoryLog`]    | yes    | yes                | tests / local dev       |
//! | [`InMemoryBus`]    | no     | no                 | tests / local dev       |
//!
//! Redis Pub/Sub is fire-and-forget: a subscriber that is down when a
//! message is published never sees it, and a handler failure loses the
//! message. Callers that need redelivery must check
//! [`BackendCapabilities::supports_replay`] instead of assuming Kafka
//! semantics.
//!
//! ## Usage
//!
//! ```rust
//! use event_bus::{EventPublisherExt, InMemoryLog, PublishOptions, TenantCreated};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryLog::new("tenant-events", 3, "tenant-service");
//! let created = TenantCreated::new(Uuid::new_v4(), "ABC", "Agency of ABC");
//!
//! // Keyed by tenant id unless the caller overrides the key
//! let receipt = log.publish(&created, &PublishOptions::default()).await?;
//! assert!(receipt.partition.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer_retry;
mod envelope;
mod events;
mod inmemory_bus;
mod inmemory_log;
pub mod kafka;
pub mod redis_pubsub;

pub use config::{BrokerKind, BusConfig};
pub use envelope::{decode, encode, validate_envelope_fields, IntegrationEnvelope};
pub use events::{EventKind, IntegrationEvent, TenantCreated, TenantDeleted, TenantEvent, TenantUpdated};
pub use inmemory_bus::InMemoryBus;
pub use inmemory_log::{InMemoryLog, InMemoryLogConsumer};
pub use kafka::{KafkaLogConsumer, KafkaPublisher, KafkaSettings};
pub use redis_pubsub::{RedisConnector, RedisPublisher, RedisSettings};

use async_trait::async_trait;
use std::fmt;

/// A message received from a pub/sub channel
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The channel this message was published to
    pub channel: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(channel: String, payload: Vec<u8>) -> Self {
        Self { channel, payload }
    }
}

/// A record read from a partitioned, offset-addressed log (Kafka or [`InMemoryLog`])
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Result of a single poll on a [`LogConsumer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPoll {
    Record(LogRecord),
    /// The consumer caught up with the end of a partition
    PartitionEof { partition: i32 },
    /// Nothing arrived within the poll window
    Idle,
}

/// What a backend guarantees to its callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Messages survive subscriber downtime and failed handling can be redelivered
    pub supports_replay: bool,
    /// Messages with the same key are delivered in publish order
    pub supports_ordering: bool,
}

impl BackendCapabilities {
    pub const DURABLE_LOG: Self = Self {
        supports_replay: true,
        supports_ordering: true,
    };

    pub const FIRE_AND_FORGET: Self = Self {
        supports_replay: false,
        supports_ordering: false,
    };
}

/// Per-call publish overrides
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Partition/ordering key. Defaults to the event's own partition key.
    pub key: Option<String>,
    /// Topic or channel. Defaults to the publisher's configured destination.
    pub destination: Option<String>,
}

impl PublishOptions {
    pub fn keyed(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            destination: None,
        }
    }

    pub fn to_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Broker acknowledgement of a publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub destination: String,
    /// Log backends: partition the record landed in
    pub partition: Option<i32>,
    /// Log backends: offset assigned to the record
    pub offset: Option<i64>,
    /// Pub/sub backends: number of subscribers that received the message
    pub receivers: Option<usize>,
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message to '{destination}': {reason}")]
    PublishError { destination: String, reason: String },

    #[error("failed to subscribe: {0}")]
    SubscribeError(String),

    #[error("failed to consume message: {0}")]
    ConsumeError(String),

    #[error("failed to commit offset: {0}")]
    CommitError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Publishing half of a broker backend.
///
/// Object safe so services can hold an `Arc<dyn EventPublisher>` chosen at
/// startup; typed publishing lives on [`EventPublisherExt`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Ship an already-encoded envelope.
    ///
    /// `key` controls partition affinity where the backend supports it;
    /// `destination` overrides the default topic/channel.
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt>;

    /// Delivery guarantees of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Service name stamped into `SourceService` of every envelope
    fn source_service(&self) -> &str;

    /// Backend name for logs ("kafka", "redis", "inmemory-log", ...)
    fn name(&self) -> &str;
}

/// Typed publishing on top of [`EventPublisher`]
#[async_trait]
pub trait EventPublisherExt: EventPublisher {
    /// Wrap `event` in an envelope and publish it.
    ///
    /// Without an explicit key the event's [`IntegrationEvent::partition_key`]
    /// is used, so all facts about one tenant share a partition. Events that
    /// declare no key get a random one (no ordering guarantee).
    async fn publish<E>(&self, event: &E, options: &PublishOptions) -> BusResult<PublishReceipt>
    where
        E: IntegrationEvent + Sync,
    {
        let envelope = encode(event, self.source_service())?;
        let key = options
            .key
            .clone()
            .or_else(|| event.partition_key())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.publish_envelope(&envelope, Some(&key), options.destination.as_deref())
            .await
    }
}

impl<P: EventPublisher + ?Sized> EventPublisherExt for P {}

/// Offset-committing consumer over a partitioned log.
///
/// Auto-commit is never used: the consumer loop calls [`LogConsumer::commit`]
/// only after a record is fully processed, and [`LogConsumer::rewind`] to
/// have a failed record presented again on the next poll.
#[async_trait]
pub trait LogConsumer: Send {
    async fn poll(&mut self) -> BusResult<LogPoll>;

    /// Mark `record` (and everything before it on its partition) as processed
    async fn commit(&mut self, record: &LogRecord) -> BusResult<()>;

    /// Reposition so the next poll on the record's partition returns `record` again
    async fn rewind(&mut self, record: &LogRecord) -> BusResult<()>;

    async fn close(&mut self) -> BusResult<()>;
}

/// An established pub/sub subscription
#[async_trait]
pub trait PubSubSession: Send {
    /// Next message, or `None` once the connection is gone
    async fn next_message(&mut self) -> Option<BusMessage>;

    /// Liveness check on the underlying connection
    async fn ping(&mut self) -> BusResult<()>;
}

/// Opens pub/sub sessions; the subscriber loop reconnects through this
#[async_trait]
pub trait PubSubConnector: Send + Sync {
    async fn connect(&self, channel: &str) -> BusResult<Box<dyn PubSubSession>>;
}

impl fmt::Debug for dyn EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventPublisher({})", self.name())
    }
}
