use super::KafkaSettings;
use crate::{BusError, BusResult, LogConsumer, LogPoll, LogRecord};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::time::Duration;

/// Consumer-group member subscribed to one topic
pub struct KafkaLogConsumer {
    consumer: StreamConsumer,
    topic: String,
    poll_timeout: Duration,
}

impl KafkaLogConsumer {
    pub fn subscribe(settings: &KafkaSettings) -> BusResult<Self> {
        let consumer: StreamConsumer = settings
            .consumer_config()
            .create()
            .map_err(|e| BusError::ConfigError(format!("failed to create Kafka consumer: {}", e)))?;

        consumer
            .subscribe(&[settings.topic.as_str()])
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        tracing::info!(
            topic = %settings.topic,
            group_id = %settings.group_id,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            topic: settings.topic.clone(),
            poll_timeout: settings.poll_timeout,
        })
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&mut self) -> BusResult<LogPoll> {
        let received = match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => return Ok(LogPoll::Idle),
            Ok(received) => received,
        };

        match received {
            Ok(message) => Ok(LogPoll::Record(LogRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Err(KafkaError::PartitionEOF(partition)) => Ok(LogPoll::PartitionEof { partition }),
            Err(e) => Err(BusError::ConsumeError(e.to_string())),
        }
    }

    async fn commit(&mut self, record: &LogRecord) -> BusResult<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| BusError::CommitError(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BusError::CommitError(e.to_string()))
    }

    async fn rewind(&mut self, record: &LogRecord) -> BusResult<()> {
        self.consumer
            .seek(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| BusError::ConsumeError(format!("seek failed: {}", e)))
    }

    async fn close(&mut self) -> BusResult<()> {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka consumer closed");
        Ok(())
    }
}
