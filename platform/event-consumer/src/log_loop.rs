//! At-least-once consumer loop over a partitioned log (Kafka semantics)
//!
//! Offsets are committed only after a record has been fully handled. A
//! record that fails in the handler is not committed; the consumer is
//! rewound to it and it is presented again after a backoff, for as long as
//! it keeps failing. If the rewind itself fails the record is held and
//! handled again in place, so nothing after it is polled until it succeeds.
//! A record that cannot be decoded is committed and dropped, since
//! redelivery would fail the same way.

use crate::router::EventRouter;
use event_bus::consumer_retry::RetryConfig;
use event_bus::{BusResult, LogConsumer, LogPoll, LogRecord};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    /// Backoff between redeliveries of a failing record (attempt limit is ignored)
    pub backoff: RetryConfig,
    /// Pause after a broker-level consume error
    pub consume_error_pause: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            backoff: RetryConfig {
                max_attempts: u32::MAX,
                initial_backoff: Duration::from_millis(500),
                max_backoff: Duration::from_secs(30),
            },
            consume_error_pause: Duration::from_secs(1),
        }
    }
}

/// Run until `shutdown` flips to `true` (or its sender is dropped), then close the consumer
pub async fn run_log_consumer<C: LogConsumer>(
    mut consumer: C,
    router: &EventRouter,
    policy: &RedeliveryPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> BusResult<()> {
    let service = router.service_name().to_string();
    let mut consecutive_failures = 0u32;
    let mut held: Option<LogRecord> = None;

    tracing::info!(service = %service, "Log consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let polled = match held.take() {
            Some(record) => Ok(LogPoll::Record(record)),
            None => tokio::select! {
                _ = shutdown.changed() => break,
                polled = consumer.poll() => polled,
            },
        };

        let record = match polled {
            Ok(LogPoll::Record(record)) => record,
            Ok(LogPoll::PartitionEof { partition }) => {
                tracing::debug!(service = %service, partition = partition, "Reached end of partition");
                continue;
            }
            Ok(LogPoll::Idle) => continue,
            Err(e) => {
                tracing::error!(service = %service, error = %e, "Consume error");
                if pause(&mut shutdown, policy.consume_error_pause).await {
                    break;
                }
                continue;
            }
        };

        if handle(&mut consumer, record, router, policy, &mut consecutive_failures, &mut held).await
            && pause(&mut shutdown, policy.backoff.backoff_for(consecutive_failures)).await
        {
            break;
        }
    }

    tracing::info!(service = %service, "Log consumer closing");
    consumer.close().await
}

/// Route one record; true if it failed and the loop should back off
async fn handle<C: LogConsumer>(
    consumer: &mut C,
    record: LogRecord,
    router: &EventRouter,
    policy: &RedeliveryPolicy,
    consecutive_failures: &mut u32,
    held: &mut Option<LogRecord>,
) -> bool {
    let service = router.service_name();
    let metrics = router.metrics();

    match router.route(&record.payload).await {
        Ok(_) => {
            *consecutive_failures = 0;
            commit(consumer, &record, service, metrics).await;
            false
        }
        Err(e) if !e.is_retryable() => {
            *consecutive_failures = 0;
            tracing::warn!(
                service = %service,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Dropping undecodable record"
            );
            commit(consumer, &record, service, metrics).await;
            false
        }
        Err(e) => {
            *consecutive_failures = consecutive_failures.saturating_add(1);
            let backoff = policy.backoff.backoff_for(*consecutive_failures);
            tracing::error!(
                service = %service,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                attempt = *consecutive_failures,
                backoff_ms = backoff.as_millis() as u64,
                error = %e,
                "Handler failed, record will be redelivered"
            );

            if let Err(seek_err) = consumer.rewind(&record).await {
                tracing::warn!(
                    service = %service,
                    partition = record.partition,
                    offset = record.offset,
                    error = %seek_err,
                    "Failed to rewind consumer, holding record for retry in place"
                );
                *held = Some(record);
            }
            true
        }
    }
}

async fn commit<C: LogConsumer>(
    consumer: &mut C,
    record: &LogRecord,
    service: &str,
    metrics: &crate::ConsumerMetrics,
) {
    match consumer.commit(record).await {
        Ok(()) => metrics.record_commit(),
        // Uncommitted records come back after a rebalance or restart; handlers are idempotent
        Err(e) => tracing::error!(
            service = %service,
            partition = record.partition,
            offset = record.offset,
            error = %e,
            "Offset commit failed"
        ),
    }
}

/// Sleep for `duration`; true if shutdown was requested meanwhile
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHandler;
    use event_bus::{
        BusError, EventKind, EventPublisherExt, InMemoryLog, InMemoryLogConsumer, PublishOptions,
        TenantDeleted,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    fn fast_policy() -> RedeliveryPolicy {
        RedeliveryPolicy {
            backoff: RetryConfig::fixed(u32::MAX, Duration::from_millis(5)),
            consume_error_pause: Duration::from_millis(5),
        }
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_commits_after_processing() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let tenant = Uuid::new_v4();
        log.publish(&TenantDeleted::new(tenant), &PublishOptions::default())
            .await
            .unwrap();

        let handler = Arc::new(RecordingHandler::default());
        let router = Arc::new(EventRouter::new(handler.clone()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let consumer = log.consumer("license");
            let router = router.clone();
            tokio::spawn(async move { run_log_consumer(consumer, &router, &fast_policy(), rx).await })
        };

        wait_for(|| log.committed_offset("license", 0) == 1).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(handler.calls(), vec![(EventKind::TenantDeleted, tenant)]);
        assert_eq!(router.metrics().snapshot().commits, 1);
    }

    /// Log consumer whose first `rewind` calls fail
    struct StuckSeek {
        inner: InMemoryLogConsumer,
        failing_rewinds: u32,
    }

    #[async_trait::async_trait]
    impl LogConsumer for StuckSeek {
        async fn poll(&mut self) -> BusResult<LogPoll> {
            self.inner.poll().await
        }

        async fn commit(&mut self, record: &LogRecord) -> BusResult<()> {
            self.inner.commit(record).await
        }

        async fn rewind(&mut self, record: &LogRecord) -> BusResult<()> {
            if self.failing_rewinds > 0 {
                self.failing_rewinds -= 1;
                return Err(BusError::ConsumeError("seek failed".to_string()));
            }
            self.inner.rewind(record).await
        }

        async fn close(&mut self) -> BusResult<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_failed_rewind_does_not_skip_the_record() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        for tenant in [first, second] {
            log.publish(&TenantDeleted::new(tenant), &PublishOptions::default())
                .await
                .unwrap();
        }

        let handler = Arc::new(RecordingHandler::failing(1));
        let router = Arc::new(EventRouter::new(handler.clone()));
        let (tx, rx) = watch::channel(false);

        let task = {
            let consumer = StuckSeek {
                inner: log.consumer("license"),
                failing_rewinds: 1,
            };
            let router = router.clone();
            tokio::spawn(async move { run_log_consumer(consumer, &router, &fast_policy(), rx).await })
        };

        wait_for(|| log.committed_offset("license", 0) == 2).await;
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            handler.calls(),
            vec![(EventKind::TenantDeleted, first), (EventKind::TenantDeleted, second)]
        );
        assert_eq!(router.metrics().snapshot().handler_failures, 1);
    }

    #[tokio::test]
    async fn test_stops_when_shutdown_sender_dropped() {
        let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
        let router = EventRouter::new(Arc::new(RecordingHandler::default()));
        let (tx, rx) = watch::channel(false);
        drop(tx);

        tokio::time::timeout(
            Duration::from_secs(1),
            run_log_consumer(log.consumer("license"), &router, &fast_policy(), rx),
        )
        .await
        .expect("loop should exit")
        .unwrap();
    }
}
