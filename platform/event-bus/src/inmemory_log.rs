//! In-memory partitioned log with Kafka semantics, for testing and development
//!
//! Records are appended to one of `N` partitions chosen by hashing the key,
//! so records sharing a key keep their publish order. Each consumer group
//! has its own committed offsets; a new consumer for a group resumes from
//! the last commit, which is how redelivery after a crash is simulated.

use crate::{
    BackendCapabilities, BusError, BusResult, EventPublisher, IntegrationEnvelope, LogConsumer,
    LogPoll, LogRecord, PublishReceipt,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct LogState {
    partitions: Vec<Vec<LogRecord>>,
    /// (group, partition) -> next offset to read
    committed: HashMap<(String, i32), i64>,
}

/// Shared handle to an in-memory topic
#[derive(Clone)]
pub struct InMemoryLog {
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
    topic: String,
    source_service: String,
}

impl InMemoryLog {
    pub fn new(topic: impl Into<String>, partitions: usize, source_service: impl Into<String>) -> Self {
        let state = LogState {
            partitions: vec![Vec::new(); partitions.max(1)],
            committed: HashMap::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            appended: Arc::new(Notify::new()),
            topic: topic.into(),
            source_service: source_service.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_count(&self) -> usize {
        self.lock().partitions.len()
    }

    /// Partition a key maps to
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count() as u64) as i32
    }

    /// Append raw bytes, bypassing envelope encoding (used to inject malformed messages)
    pub fn append_raw(&self, key: &str, payload: Vec<u8>) -> LogRecord {
        let partition = self.partition_for(key);
        let record = {
            let mut state = self.lock();
            let log = &mut state.partitions[partition as usize];
            let record = LogRecord {
                topic: self.topic.clone(),
                partition,
                offset: log.len() as i64,
                key: Some(key.to_string()),
                payload,
            };
            log.push(record.clone());
            record
        };
        self.appended.notify_waiters();
        record
    }

    /// Every record on a partition, in offset order
    pub fn records(&self, partition: i32) -> Vec<LogRecord> {
        self.lock()
            .partitions
            .get(partition as usize)
            .cloned()
            .unwrap_or_default()
    }

    /// Next offset `group` will read on `partition` after a restart
    pub fn committed_offset(&self, group: &str, partition: i32) -> i64 {
        self.lock()
            .committed
            .get(&(group.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// A consumer for `group`, positioned at the group's committed offsets
    pub fn consumer(&self, group: impl Into<String>) -> InMemoryLogConsumer {
        let group = group.into();
        let positions = {
            let state = self.lock();
            (0..state.partitions.len() as i32)
                .map(|p| {
                    let offset = state
                        .committed
                        .get(&(group.clone(), p))
                        .copied()
                        .unwrap_or(0);
                    (p, offset)
                })
                .collect()
        };

        InMemoryLogConsumer {
            log: self.clone(),
            group,
            positions,
            eof_reported: HashMap::new(),
            next_partition: 0,
            poll_timeout: Duration::from_millis(50),
            closed: false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        // A poisoned lock only means a test panicked mid-append; the data is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventPublisher for InMemoryLog {
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt> {
        if let Some(destination) = destination {
            if destination != self.topic {
                return Err(BusError::PublishError {
                    destination: destination.to_string(),
                    reason: format!("unknown topic (this log is '{}')", self.topic),
                });
            }
        }

        let key = key
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let record = self.append_raw(&key, envelope.to_vec()?);

        Ok(PublishReceipt {
            destination: self.topic.clone(),
            partition: Some(record.partition),
            offset: Some(record.offset),
            receivers: None,
        })
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::DURABLE_LOG
    }

    fn source_service(&self) -> &str {
        &self.source_service
    }

    fn name(&self) -> &str {
        "inmemory-log"
    }
}

/// Consumer-group member reading an [`InMemoryLog`]
pub struct InMemoryLogConsumer {
    log: InMemoryLog,
    group: String,
    positions: HashMap<i32, i64>,
    eof_reported: HashMap<i32, i64>,
    next_partition: i32,
    poll_timeout: Duration,
    closed: bool,
}

impl InMemoryLogConsumer {
    /// How long a poll waits for new records before returning [`LogPoll::Idle`]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn try_next(&mut self) -> Option<LogPoll> {
        let state = self.log.lock();
        let count = state.partitions.len() as i32;

        for step in 0..count {
            let partition = (self.next_partition + step) % count;
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let log = &state.partitions[partition as usize];

            if let Some(record) = log.get(position as usize) {
                self.positions.insert(partition, position + 1);
                self.next_partition = (partition + 1) % count;
                return Some(LogPoll::Record(record.clone()));
            }

            if position > 0 && self.eof_reported.get(&partition) != Some(&position) {
                self.eof_reported.insert(partition, position);
                return Some(LogPoll::PartitionEof { partition });
            }
        }

        None
    }
}

#[async_trait]
impl LogConsumer for InMemoryLogConsumer {
    async fn poll(&mut self) -> BusResult<LogPoll> {
        if self.closed {
            return Err(BusError::ConsumeError("consumer is closed".to_string()));
        }

        let appended = self.log.appended.clone();
        let notified = appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(polled) = self.try_next() {
            return Ok(polled);
        }

        if tokio::time::timeout(self.poll_timeout, notified).await.is_err() {
            return Ok(LogPoll::Idle);
        }

        Ok(self.try_next().unwrap_or(LogPoll::Idle))
    }

    async fn commit(&mut self, record: &LogRecord) -> BusResult<()> {
        let mut state = self.log.lock();
        let key = (self.group.clone(), record.partition);
        let next = record.offset + 1;
        let current = state.committed.get(&key).copied().unwrap_or(0);
        if next > current {
            state.committed.insert(key, next);
        }
        Ok(())
    }

    async fn rewind(&mut self, record: &LogRecord) -> BusResult<()> {
        self.positions.insert(record.partition, record.offset);
        self.next_partition = record.partition;
        Ok(())
    }

    async fn close(&mut self) -> BusResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode, EventPublisherExt, PublishOptions, TenantDeleted, TenantEvent};
    use uuid::Uuid;

    async fn next_record(consumer: &mut InMemoryLogConsumer) -> LogRecord {
        loop {
            match consumer.poll().await.unwrap() {
                LogPoll::Record(record) => return record,
                LogPoll::PartitionEof { .. } | LogPoll::Idle => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let log = InMemoryLog::new("tenant-events", 4, "tenant-service");
        let tenant = Uuid::new_v4();

        let first = log
            .publish(&TenantDeleted::new(tenant), &PublishOptions::keyed(tenant.to_string()))
            .await
            .unwrap();
        let second = log
            .publish(&TenantDeleted::new(tenant), &PublishOptions::keyed(tenant.to_string()))
            .await
            .unwrap();

        assert_eq!(first.partition, second.partition);
        assert!(second.offset > first.offset);
    }

    #[tokio::test]
    async fn test_default_key_is_tenant_id() {
        let log = InMemoryLog::new("tenant-events", 8, "tenant-service");
        let tenant = Uuid::new_v4();

        let receipt = log
            .publish(&TenantEvent::from(TenantDeleted::new(tenant)), &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.partition, Some(log.partition_for(&tenant.to_string())));
        let stored = &log.records(receipt.partition.unwrap())[0];
        assert_eq!(stored.key.as_deref(), Some(tenant.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_unknown_destination_is_rejected() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let envelope = encode(&TenantDeleted::new(Uuid::new_v4()), "tenant-service").unwrap();

        let result = log.publish_envelope(&envelope, None, Some("other-topic")).await;
        assert!(matches!(result, Err(BusError::PublishError { .. })));
    }

    #[tokio::test]
    async fn test_uncommitted_record_is_redelivered_to_new_consumer() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        log.append_raw("k", b"one".to_vec());
        log.append_raw("k", b"two".to_vec());

        let mut consumer = log.consumer("license");
        let first = next_record(&mut consumer).await;
        consumer.commit(&first).await.unwrap();
        let second = next_record(&mut consumer).await;
        assert_eq!(second.payload, b"two");
        // crash before committing `second`
        drop(consumer);

        let mut restarted = log.consumer("license");
        let redelivered = next_record(&mut restarted).await;
        assert_eq!(redelivered.offset, second.offset);
        assert_eq!(log.committed_offset("license", 0), 1);
    }

    #[tokio::test]
    async fn test_rewind_presents_record_again() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        log.append_raw("k", b"one".to_vec());

        let mut consumer = log.consumer("license");
        let record = next_record(&mut consumer).await;
        consumer.rewind(&record).await.unwrap();

        assert_eq!(next_record(&mut consumer).await, record);
    }

    #[tokio::test]
    async fn test_partition_eof_reported_once() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        log.append_raw("k", b"one".to_vec());

        let mut consumer = log
            .consumer("license")
            .with_poll_timeout(Duration::from_millis(10));
        next_record(&mut consumer).await;

        assert_eq!(consumer.poll().await.unwrap(), LogPoll::PartitionEof { partition: 0 });
        assert_eq!(consumer.poll().await.unwrap(), LogPoll::Idle);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let record = log.append_raw("k", b"one".to_vec());

        let mut license = log.consumer("license");
        let polled = next_record(&mut license).await;
        license.commit(&polled).await.unwrap();

        assert_eq!(log.committed_offset("license", 0), record.offset + 1);
        assert_eq!(log.committed_offset("payments", 0), 0);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let mut consumer = log.consumer("license").with_poll_timeout(Duration::from_secs(5));

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append_raw("k", b"late".to_vec());
        });

        let polled = tokio::time::timeout(Duration::from_secs(1), consumer.poll())
            .await
            .expect("poll should wake on append")
            .unwrap();
        assert!(matches!(polled, LogPoll::Record(r) if r.payload == b"late"));
    }
}
