/// Tenant lifecycle across every service on a partitioned log
///
/// The tenant registry stages events in its outbox, the relay ships them to
/// an in-memory log, and each downstream service consumes the log in its own
/// consumer group, exactly as they would on Kafka.
use document_rs::{category_handler, CategoryHandler, DocumentCategory};
use event_bus::consumer_retry::RetryConfig;
use event_bus::{InMemoryLog, IntegrationEnvelope};
use event_consumer::{
    spawn_consumer, ConsumerSource, EventRouter, InMemoryLedger, InMemoryResourceStore,
    LoopPolicies, RedeliveryPolicy, TenantResource, TenantResourceStore,
};
use license_rs::{license_type_handler, LicenseType, LicenseTypeHandler};
use notifications_rs::{template_handler, NotificationTemplate, TemplateHandler};
use payments_rs::{fee_schedule_handler, FeeSchedule, FeeScheduleHandler};
use std::sync::Arc;
use std::time::Duration;
use tenant_registry::{
    CreateTenant, DispatchMode, InMemoryTenantStore, OutboxRelay, RelaySettings, TenantService,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

type Mem<R> = InMemoryResourceStore<R>;

struct Platform {
    log: InMemoryLog,
    tenants: TenantService<InMemoryTenantStore>,
    relay: OutboxRelay,
    license: Arc<LicenseTypeHandler<Mem<LicenseType>>>,
    notifications: Arc<TemplateHandler<Mem<NotificationTemplate>>>,
    documents: Arc<CategoryHandler<Mem<DocumentCategory>>>,
    payments: Arc<FeeScheduleHandler<Mem<FeeSchedule>>>,
    license_router: Arc<EventRouter>,
    shutdown: watch::Sender<bool>,
    consumers: Vec<JoinHandle<event_bus::BusResult<()>>>,
}

impl Platform {
    fn start() -> Self {
        let log = InMemoryLog::new("tenant-events", 3, "tenant-service");
        let store = Arc::new(InMemoryTenantStore::new());
        let tenants = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
        let relay = OutboxRelay::new(
            store,
            Arc::new(log.clone()),
            RelaySettings {
                poll_interval: Duration::from_millis(10),
                ..RelaySettings::default()
            },
        );

        let license = Arc::new(license_type_handler(Mem::new()));
        let notifications = Arc::new(template_handler(Mem::new()));
        let documents = Arc::new(category_handler(Mem::new()));
        let payments = Arc::new(fee_schedule_handler(Mem::new()));

        let license_router = Arc::new(
            EventRouter::new(license.clone()).with_ledger(Arc::new(InMemoryLedger::new())),
        );
        let routers = vec![
            license_router.clone(),
            Arc::new(EventRouter::new(notifications.clone()).with_ledger(Arc::new(InMemoryLedger::new()))),
            Arc::new(EventRouter::new(documents.clone()).with_ledger(Arc::new(InMemoryLedger::new()))),
            Arc::new(EventRouter::new(payments.clone()).with_ledger(Arc::new(InMemoryLedger::new()))),
        ];

        let (shutdown, shutdown_rx) = watch::channel(false);
        let policies = LoopPolicies {
            redelivery: RedeliveryPolicy {
                backoff: RetryConfig::fixed(u32::MAX, Duration::from_millis(5)),
                consume_error_pause: Duration::from_millis(5),
            },
            ..LoopPolicies::default()
        };

        let consumers = routers
            .into_iter()
            .map(|router| {
                let group = router.service_name().to_string();
                spawn_consumer(
                    ConsumerSource::InMemoryLog {
                        log: log.clone(),
                        group,
                    },
                    router,
                    policies.clone(),
                    shutdown_rx.clone(),
                )
            })
            .collect();

        Self {
            log,
            tenants,
            relay,
            license,
            notifications,
            documents,
            payments,
            license_router,
            shutdown,
            consumers,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        for consumer in self.consumers {
            consumer.await.unwrap().unwrap();
        }
    }
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Active rows of one tenant in an in-memory store
fn active<R: TenantResource>(store: &Mem<R>, tenant_id: Uuid) -> usize {
    store.all_for(tenant_id).iter().filter(|r| r.is_active()).count()
}

fn abc() -> CreateTenant {
    CreateTenant {
        agency_code: "ABC".to_string(),
        name: "Agency of ABC".to_string(),
        contact_email: Some("ops@abc.gov".to_string()),
    }
}

#[tokio::test]
async fn test_created_tenant_is_provisioned_by_every_service() {
    let platform = Platform::start();

    let tenant = platform.tenants.create_tenant(abc()).await.unwrap();
    let report = platform.relay.relay_once().await.unwrap();
    assert_eq!(report.published, 1);

    let id = tenant.id;
    wait_for(|| active(platform.license.store(), id) == 3).await;
    wait_for(|| active(platform.notifications.store(), id) == 4).await;
    wait_for(|| active(platform.documents.store(), id) == 5).await;
    wait_for(|| active(platform.payments.store(), id) == 4).await;

    platform.stop().await;
}

#[tokio::test]
async fn test_repeated_delivery_keeps_three_license_types() {
    let platform = Platform::start();
    let tenant = platform.tenants.create_tenant(abc()).await.unwrap();
    platform.relay.relay_once().await.unwrap();

    let id = tenant.id;
    wait_for(|| active(platform.license.store(), id) == 3).await;

    // The broker hands the same record out again
    let partition = platform.log.partition_for(&id.to_string());
    let original = platform.log.records(partition)[0].clone();
    platform
        .log
        .append_raw(original.key.as_deref().unwrap_or_default(), original.payload.clone());

    wait_for(|| platform.license_router.metrics().snapshot().duplicates == 1).await;
    assert_eq!(platform.license.store().list_active(id).await.unwrap().len(), 3);

    // A fresh envelope for the same fact gets past the ledger; the existence check holds
    let envelope = IntegrationEnvelope::from_slice(&original.payload).unwrap();
    let republished = event_bus::encode(
        &event_bus::TenantEvent::decode_named(&envelope.event_type, &envelope.payload).unwrap(),
        "tenant-service",
    )
    .unwrap();
    platform
        .log
        .append_raw(&id.to_string(), republished.to_vec().unwrap());

    wait_for(|| platform.license_router.metrics().snapshot().processed == 2).await;
    assert_eq!(platform.license.store().list_active(id).await.unwrap().len(), 3);

    platform.stop().await;
}

#[tokio::test]
async fn test_deleted_tenant_is_torn_down_everywhere() {
    let platform = Platform::start();
    let relay_shutdown = platform.shutdown.subscribe();

    let tenant = platform.tenants.create_tenant(abc()).await.unwrap();
    platform
        .tenants
        .update_tenant(tenant.id, "Agency of ABC County", None)
        .await
        .unwrap();
    platform.tenants.delete_tenant(tenant.id).await.unwrap();

    let Platform {
        log,
        relay,
        license,
        notifications,
        documents,
        payments,
        shutdown,
        consumers,
        ..
    } = platform;
    let relay_task = tokio::spawn(async move { relay.run(relay_shutdown).await });

    let id = tenant.id;
    let partition = log.partition_for(&id.to_string());
    wait_for(|| log.committed_offset("payment-service", partition) == 3).await;
    wait_for(|| log.committed_offset("license-service", partition) == 3).await;
    wait_for(|| log.committed_offset("notification-service", partition) == 3).await;
    wait_for(|| log.committed_offset("document-service", partition) == 3).await;

    assert!(license.store().list_active(id).await.unwrap().is_empty());
    assert!(notifications.store().list_active(id).await.unwrap().is_empty());
    assert!(documents.store().list_active(id).await.unwrap().is_empty());
    assert!(payments.store().list_active(id).await.unwrap().is_empty());

    let licenses = license.store().all_for(id);
    assert_eq!(licenses.len(), 3);
    assert!(licenses.iter().all(|l| l.is_deleted && l.deleted_at.is_some()));

    shutdown.send(true).unwrap();
    relay_task.await.unwrap();
    for consumer in consumers {
        consumer.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_other_tenants_are_untouched_by_a_deletion() {
    let platform = Platform::start();
    let abc = platform.tenants.create_tenant(abc()).await.unwrap();
    let xyz = platform
        .tenants
        .create_tenant(CreateTenant {
            agency_code: "XYZ".to_string(),
            name: "Agency of XYZ".to_string(),
            contact_email: None,
        })
        .await
        .unwrap();
    platform.tenants.delete_tenant(abc.id).await.unwrap();
    platform.relay.relay_once().await.unwrap();

    let (gone, kept) = (abc.id, xyz.id);
    wait_for(|| {
        let rows = platform.license.store().all_for(gone);
        rows.len() == 3 && rows.iter().all(|l| l.is_deleted)
    })
    .await;
    wait_for(|| active(platform.license.store(), kept) == 3).await;

    platform.stop().await;
}

#[tokio::test]
async fn test_unknown_tenant_id_never_reaches_consumers() {
    let platform = Platform::start();
    let missing = Uuid::new_v4();

    assert!(platform.tenants.delete_tenant(missing).await.is_err());
    assert_eq!(platform.relay.relay_once().await.unwrap().published, 0);

    platform.stop().await;
}
