//! Outbox relay behaviour against in-memory store and brokers

use async_trait::async_trait;
use event_bus::{
    BackendCapabilities, BusError, BusResult, EventPublisher, InMemoryLog, IntegrationEnvelope,
    PublishReceipt,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tenant_registry::{
    CreateTenant, DispatchMode, InMemoryTenantStore, OutboxRelay, OutboxStatus, OutboxStore,
    RelayReport, RelaySettings, TenantService,
};

/// Fails the first `failures` publishes, then forwards to the log
struct FlakyPublisher {
    log: InMemoryLog,
    failures: AtomicU32,
}

impl FlakyPublisher {
    fn new(log: InMemoryLog, failures: u32) -> Self {
        Self {
            log,
            failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish_envelope(
        &self,
        envelope: &IntegrationEnvelope,
        key: Option<&str>,
        destination: Option<&str>,
    ) -> BusResult<PublishReceipt> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BusError::PublishError {
                destination: self.log.topic().to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        self.log.publish_envelope(envelope, key, destination).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.log.capabilities()
    }

    fn source_service(&self) -> &str {
        self.log.source_service()
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

fn settings(max_attempts: i32) -> RelaySettings {
    RelaySettings {
        max_attempts,
        poll_interval: Duration::from_millis(10),
        ..RelaySettings::default()
    }
}

fn request(code: &str) -> CreateTenant {
    CreateTenant {
        agency_code: code.to_string(),
        name: format!("Agency of {}", code),
        contact_email: None,
    }
}

#[tokio::test]
async fn test_relay_publishes_pending_records_in_order() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    let tenant = service.create_tenant(request("ABC")).await.unwrap();
    service.delete_tenant(tenant.id).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let relay = OutboxRelay::new(store.clone(), Arc::new(log.clone()), settings(5));

    let report = relay.relay_once().await.unwrap();
    assert_eq!(report, RelayReport { published: 2, failed: 0, deferred: 0 });

    let types: Vec<String> = log
        .records(0)
        .iter()
        .map(|r| IntegrationEnvelope::from_slice(&r.payload).unwrap().event_type)
        .collect();
    assert_eq!(types, vec!["TenantCreated", "TenantDeleted"]);
    assert!(store
        .outbox()
        .iter()
        .all(|r| r.status == OutboxStatus::Published && r.published_at.is_some()));

    // Nothing left to send
    let report = relay.relay_once().await.unwrap();
    assert_eq!(report, RelayReport::default());
}

#[tokio::test]
async fn test_failed_publish_keeps_record_pending_and_holds_back_its_key() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    let tenant = service.create_tenant(request("ABC")).await.unwrap();
    service.delete_tenant(tenant.id).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let publisher = Arc::new(FlakyPublisher::new(log.clone(), 1));
    let relay = OutboxRelay::new(store.clone(), publisher, settings(5));

    let report = relay.relay_once().await.unwrap();
    assert_eq!(report, RelayReport { published: 0, failed: 1, deferred: 1 });
    assert!(log.records(0).is_empty());

    let outbox = store.outbox();
    assert_eq!(outbox[0].status, OutboxStatus::Pending);
    assert_eq!(outbox[0].attempts, 1);
    assert!(outbox[0].last_error.as_deref().unwrap().contains("broker unavailable"));

    // The broker recovers: both go out, created before deleted
    let report = relay.relay_once().await.unwrap();
    assert_eq!(report.published, 2);
    let types: Vec<String> = log
        .records(0)
        .iter()
        .map(|r| IntegrationEnvelope::from_slice(&r.payload).unwrap().event_type)
        .collect();
    assert_eq!(types, vec!["TenantCreated", "TenantDeleted"]);
}

#[tokio::test]
async fn test_record_is_parked_after_max_attempts() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    service.create_tenant(request("ABC")).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let publisher = Arc::new(FlakyPublisher::new(log.clone(), u32::MAX));
    let relay = OutboxRelay::new(store.clone(), publisher, settings(3));

    for _ in 0..3 {
        relay.relay_once().await.unwrap();
    }

    let record = &store.outbox()[0];
    assert_eq!(record.status, OutboxStatus::Failed);
    assert_eq!(record.attempts, 3);

    // Parked records are no longer picked up
    assert_eq!(relay.relay_once().await.unwrap(), RelayReport::default());
    assert_eq!(relay.metrics().snapshot().parked, 1);
    assert_eq!(relay.metrics().snapshot().retried, 2);
}

#[tokio::test]
async fn test_parked_record_holds_back_its_key_until_requeued() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    let tenant = service.create_tenant(request("ABC")).await.unwrap();
    service.delete_tenant(tenant.id).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let publisher = Arc::new(FlakyPublisher::new(log.clone(), 2));
    let relay = OutboxRelay::new(store.clone(), publisher, settings(2));

    relay.relay_once().await.unwrap();
    relay.relay_once().await.unwrap();

    // The broker is back, but TenantDeleted must not overtake the parked TenantCreated
    assert_eq!(relay.relay_once().await.unwrap(), RelayReport::default());
    assert!(log.records(0).is_empty());
    let statuses: Vec<OutboxStatus> = store.outbox().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![OutboxStatus::Failed, OutboxStatus::Pending]);

    let requeued = relay.requeue_failed(&tenant.id.to_string()).await.unwrap();
    assert_eq!(requeued, 1);

    let report = relay.relay_once().await.unwrap();
    assert_eq!(report.published, 2);
    let types: Vec<String> = log
        .records(0)
        .iter()
        .map(|r| IntegrationEnvelope::from_slice(&r.payload).unwrap().event_type)
        .collect();
    assert_eq!(types, vec!["TenantCreated", "TenantDeleted"]);
}

#[tokio::test]
async fn test_purge_removes_only_expired_published_records() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    service.create_tenant(request("ABC")).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let relay = OutboxRelay::new(store.clone(), Arc::new(log.clone()), settings(5));
    relay.relay_once().await.unwrap();

    // Published well before the seven day window
    let old = store.outbox()[0].id;
    store
        .mark_published(old, Utc::now() - chrono::Duration::days(10))
        .await
        .unwrap();

    service.create_tenant(request("XYZ")).await.unwrap();
    relay.relay_once().await.unwrap();
    let pending = service.create_tenant(request("QRS")).await.unwrap();

    assert_eq!(relay.purge_published().await.unwrap(), 1);

    let remaining = store.outbox();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|r| r.id != old));
    assert_eq!(remaining[1].partition_key, pending.id.to_string());
    assert_eq!(remaining[1].status, OutboxStatus::Pending);
    assert_eq!(relay.metrics().snapshot().purged, 1);
}

#[tokio::test]
async fn test_other_tenants_are_not_held_back_by_a_failure() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    service.create_tenant(request("ABC")).await.unwrap();
    service.create_tenant(request("XYZ")).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let publisher = Arc::new(FlakyPublisher::new(log.clone(), 1));
    let relay = OutboxRelay::new(store.clone(), publisher, settings(5));

    let report = relay.relay_once().await.unwrap();
    assert_eq!(report, RelayReport { published: 1, failed: 1, deferred: 0 });
}

#[tokio::test]
async fn test_run_drains_outbox_until_shutdown() {
    let store = Arc::new(InMemoryTenantStore::new());
    let service = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    service.create_tenant(request("ABC")).await.unwrap();

    let log = InMemoryLog::new("tenant-events", 1, "tenant-service");
    let relay = OutboxRelay::new(store.clone(), Arc::new(log.clone()), settings(5));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while log.records(0).is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay did not publish in time");

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
    assert_eq!(store.outbox()[0].status, OutboxStatus::Published);
}
