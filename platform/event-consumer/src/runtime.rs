//! Start the right consumer loop for the configured broker

use crate::log_loop::{run_log_consumer, RedeliveryPolicy};
use crate::pubsub_loop::{run_pubsub_subscriber, SubscriberPolicy};
use crate::router::EventRouter;
use event_bus::config::DEFAULT_TOPIC;
use event_bus::{
    BrokerKind, BusConfig, BusResult, InMemoryBus, InMemoryLog, KafkaLogConsumer, KafkaSettings,
    RedisConnector, RedisSettings,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where a service's consumer reads tenant events from
pub enum ConsumerSource {
    Kafka(KafkaSettings),
    Redis(RedisSettings),
    /// Shared in-process log; `group` plays the Kafka consumer group
    InMemoryLog { log: InMemoryLog, group: String },
    /// Shared in-process pub/sub
    InMemoryPubSub(InMemoryBus),
}

impl ConsumerSource {
    pub fn from_config(config: &BusConfig) -> Self {
        match config.broker {
            BrokerKind::Kafka => ConsumerSource::Kafka(config.kafka.clone()),
            BrokerKind::Redis => ConsumerSource::Redis(config.redis.clone()),
            BrokerKind::InMemory => {
                tracing::warn!(
                    service = %config.service_name,
                    "In-memory broker: this consumer only sees events published inside this process"
                );
                ConsumerSource::InMemoryLog {
                    log: InMemoryLog::new(DEFAULT_TOPIC, 1, config.service_name.clone()),
                    group: config.service_name.clone(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopPolicies {
    pub redelivery: RedeliveryPolicy,
    pub subscriber: SubscriberPolicy,
}

/// Spawn the consumer task for `source`
///
/// The task runs until `shutdown` flips to `true`. Its result is an error
/// only if the consumer could not be created or the log could not be
/// repositioned to a failed record.
pub fn spawn_consumer(
    source: ConsumerSource,
    router: Arc<EventRouter>,
    policies: LoopPolicies,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<BusResult<()>> {
    tokio::spawn(async move {
        let service = router.service_name().to_string();

        let result = match source {
            ConsumerSource::Kafka(settings) => {
                let consumer = KafkaLogConsumer::subscribe(&settings)?;
                run_log_consumer(consumer, &router, &policies.redelivery, shutdown).await
            }
            ConsumerSource::Redis(settings) => {
                let connector = RedisConnector::new(&settings)?;
                run_pubsub_subscriber(
                    &connector,
                    &settings.channel,
                    &router,
                    &policies.subscriber,
                    shutdown,
                )
                .await
            }
            ConsumerSource::InMemoryLog { log, group } => {
                run_log_consumer(log.consumer(group), &router, &policies.redelivery, shutdown).await
            }
            ConsumerSource::InMemoryPubSub(bus) => {
                let channel = bus.channel().to_string();
                run_pubsub_subscriber(&bus, &channel, &router, &policies.subscriber, shutdown).await
            }
        };

        if let Err(e) = &result {
            tracing::error!(service = %service, error = %e, "Consumer task stopped with error");
        }
        result
    })
}
