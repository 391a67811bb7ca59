//! Kafka backend (rdkafka)
//!
//! The producer is configured for idempotent, fully acknowledged writes.
//! The consumer never auto-commits; offsets move only when the consumer
//! loop calls [`LogConsumer::commit`](crate::LogConsumer::commit).

mod consumer;
mod producer;

pub use consumer::KafkaLogConsumer;
pub use producer::KafkaPublisher;

use crate::config::{env_opt, env_or, env_parse, DEFAULT_TOPIC};
use rdkafka::config::ClientConfig;
use std::time::Duration;

#[derive(Clone, PartialEq, Eq)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub group_id: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Producer-side retries before a send is reported as failed
    pub message_send_max_retries: u32,
    /// Fixed delay between producer retries
    pub retry_backoff: Duration,
    /// Upper bound on a single produce call, including retries
    pub delivery_timeout: Duration,
    /// How long a consumer poll waits before reporting idle
    pub poll_timeout: Duration,
}

impl std::fmt::Debug for KafkaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSettings")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("message_send_max_retries", &self.message_send_max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .field("delivery_timeout", &self.delivery_timeout)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl KafkaSettings {
    pub fn new(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            topic: DEFAULT_TOPIC.to_string(),
            group_id: group_id.into(),
            security_protocol: None,
            sasl_mechanism: None,
            username: None,
            password: None,
            message_send_max_retries: 3,
            retry_backoff: Duration::from_millis(1000),
            delivery_timeout: Duration::from_secs(30),
            poll_timeout: Duration::from_secs(1),
        }
    }

    pub fn from_env(service_name: &str) -> Result<Self, String> {
        let bootstrap_servers = env_opt("KAFKA_BOOTSTRAP_SERVERS")
            .ok_or_else(|| "KAFKA_BOOTSTRAP_SERVERS must be set when BROKER_TYPE=kafka".to_string())?;

        let mut settings = Self::new(bootstrap_servers, env_or("KAFKA_GROUP_ID", service_name));
        settings.topic = env_or("KAFKA_TOPIC", DEFAULT_TOPIC);
        settings.security_protocol = env_opt("KAFKA_SECURITY_PROTOCOL");
        settings.sasl_mechanism = env_opt("KAFKA_SASL_MECHANISM");
        settings.username = env_opt("KAFKA_USERNAME");
        settings.password = env_opt("KAFKA_PASSWORD");
        settings.message_send_max_retries = env_parse("KAFKA_MESSAGE_SEND_MAX_RETRIES", 3)?;
        settings.retry_backoff = Duration::from_millis(env_parse("KAFKA_RETRY_BACKOFF_MS", 1000)?);

        if settings.sasl_mechanism.is_some() && settings.username.is_none() {
            return Err("KAFKA_USERNAME must be set when KAFKA_SASL_MECHANISM is set".to_string());
        }

        Ok(settings)
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Connection and security settings shared by producer and consumer
    fn base_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);

        if let Some(protocol) = &self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(mechanism) = &self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.username {
            config.set("sasl.username", username);
        }
        if let Some(password) = &self.password {
            config.set("sasl.password", password);
        }

        config
    }

    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set(
                "message.send.max.retries",
                self.message_send_max_retries.to_string(),
            )
            .set("retry.backoff.ms", self.retry_backoff.as_millis().to_string())
            .set(
                "message.timeout.ms",
                self.delivery_timeout.as_millis().to_string(),
            );
        config
    }

    pub(crate) fn consumer_config(&self) -> ClientConfig {
        let mut config = self.base_config();
        config
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "true");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KafkaSettings {
        KafkaSettings::new("broker-1:9092,broker-2:9092", "license-service")
    }

    #[test]
    fn test_producer_config_is_idempotent_and_fully_acked() {
        let config = settings().producer_config();

        assert_eq!(config.get("acks"), Some("all"));
        assert_eq!(config.get("enable.idempotence"), Some("true"));
        assert_eq!(config.get("message.send.max.retries"), Some("3"));
        assert_eq!(config.get("retry.backoff.ms"), Some("1000"));
        assert_eq!(config.get("group.id"), None);
    }

    #[test]
    fn test_consumer_config_disables_auto_commit() {
        let config = settings().consumer_config();

        assert_eq!(config.get("group.id"), Some("license-service"));
        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("enable.partition.eof"), Some("true"));
        assert_eq!(config.get("auto.offset.reset"), Some("earliest"));
    }

    #[test]
    fn test_sasl_settings_only_when_configured() {
        let plain = settings().consumer_config();
        assert_eq!(plain.get("sasl.mechanism"), None);
        assert_eq!(plain.get("security.protocol"), None);

        let mut secured = settings();
        secured.security_protocol = Some("SASL_SSL".to_string());
        secured.sasl_mechanism = Some("PLAIN".to_string());
        secured.username = Some("svc".to_string());
        secured.password = Some("secret".to_string());

        let config = secured.producer_config();
        assert_eq!(config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(config.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(config.get("sasl.username"), Some("svc"));
        assert_eq!(config.get("sasl.password"), Some("secret"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut secured = settings();
        secured.username = Some("svc".to_string());
        secured.password = Some("s3cret".to_string());

        let debug = format!("{:?}", secured);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("svc"));

        // BusConfig carries the settings into startup logs
        let config = crate::BusConfig {
            broker: crate::BrokerKind::Kafka,
            service_name: "license-service".to_string(),
            kafka: secured,
            redis: crate::RedisSettings::default(),
        };
        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_default_topic() {
        assert_eq!(settings().topic, "tenant-events");
        assert_eq!(settings().with_topic("other").topic, "other");
    }
}
