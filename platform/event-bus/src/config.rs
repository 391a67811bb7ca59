//! Broker selection from the environment
//!
//! `BROKER_TYPE` picks the backend; the remaining keys configure it.
//! Unknown values fall back to the in-memory backend with a warning so a
//! misconfigured dev box still boots.

use crate::kafka::KafkaSettings;
use crate::redis_pubsub::RedisSettings;
use crate::{BusResult, EventPublisher, InMemoryBus, InMemoryLog, KafkaPublisher, RedisPublisher};
use std::env;
use std::sync::Arc;

pub const DEFAULT_TOPIC: &str = "tenant-events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Kafka,
    Redis,
    InMemory,
}

impl BrokerKind {
    pub fn from_env() -> Self {
        Self::parse(&env::var("BROKER_TYPE").unwrap_or_else(|_| "inmemory".to_string()))
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "kafka" => BrokerKind::Kafka,
            "redis" => BrokerKind::Redis,
            "inmemory" | "in-memory" | "memory" => BrokerKind::InMemory,
            other => {
                tracing::warn!(broker_type = %other, "Unknown BROKER_TYPE, defaulting to inmemory");
                BrokerKind::InMemory
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub broker: BrokerKind,
    /// Service name written to `SourceService` and used as the Kafka group id default
    pub service_name: String,
    pub kafka: KafkaSettings,
    pub redis: RedisSettings,
}

impl BusConfig {
    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let broker = BrokerKind::from_env();

        let kafka = match broker {
            BrokerKind::Kafka => KafkaSettings::from_env(service_name)?,
            _ => KafkaSettings::new("localhost:9092", service_name),
        };

        let redis = match broker {
            BrokerKind::Redis => RedisSettings::from_env()?,
            _ => RedisSettings::default(),
        };

        Ok(Self {
            broker,
            service_name: service_name.to_string(),
            kafka,
            redis,
        })
    }

    /// Topic or channel this service publishes to and consumes from
    pub fn destination(&self) -> &str {
        match self.broker {
            BrokerKind::Kafka => &self.kafka.topic,
            BrokerKind::Redis => &self.redis.channel,
            BrokerKind::InMemory => DEFAULT_TOPIC,
        }
    }

    /// Build the publisher for the configured backend
    ///
    /// Kafka and Redis clients are created here but connect lazily, so this
    /// does not fail just because the broker is briefly unreachable.
    pub fn build_publisher(&self) -> BusResult<Arc<dyn EventPublisher>> {
        let publisher: Arc<dyn EventPublisher> = match self.broker {
            BrokerKind::Kafka => Arc::new(KafkaPublisher::new(&self.kafka, &self.service_name)?),
            BrokerKind::Redis => Arc::new(RedisPublisher::new(&self.redis, &self.service_name)?),
            BrokerKind::InMemory => {
                tracing::warn!("Using in-memory event bus; events will not leave this process");
                Arc::new(InMemoryLog::new(DEFAULT_TOPIC, 1, self.service_name.clone()))
            }
        };

        tracing::info!(
            backend = publisher.name(),
            destination = self.destination(),
            "Event publisher ready"
        );
        Ok(publisher)
    }

    /// In-memory pub/sub bound to this config's channel, for local runs of the Redis code path
    pub fn inmemory_pubsub(&self) -> InMemoryBus {
        InMemoryBus::new(self.redis.channel.clone(), self.service_name.clone())
    }
}

/// Read an env var, falling back to `default` when unset
pub(crate) fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an optional env var, treating an empty value as unset
pub(crate) fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a numeric env var, rejecting values that do not parse
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a number, got '{}'", key, raw)),
        None => Ok(default),
    }
}
