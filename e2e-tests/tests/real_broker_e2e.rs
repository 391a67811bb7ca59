/// Tenant provisioning against real brokers
///
/// Ignored by default. Run with:
/// KAFKA_BOOTSTRAP_SERVERS=localhost:9092 REDIS_CONNECTION=localhost:6379 \
///     cargo test -p e2e-tests --test real_broker_e2e -- --ignored
use event_bus::{KafkaPublisher, KafkaSettings, RedisPublisher, RedisSettings};
use event_consumer::{
    spawn_consumer, ConsumerSource, EventRouter, InMemoryLedger, InMemoryResourceStore,
    LoopPolicies, TenantResource,
};
use license_rs::{license_type_handler, LicenseType, LicenseTypeHandler};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tenant_registry::{
    CreateTenant, DispatchMode, InMemoryTenantStore, OutboxRelay, RelaySettings, TenantService,
};
use tokio::sync::watch;
use uuid::Uuid;

type Handler = LicenseTypeHandler<InMemoryResourceStore<LicenseType>>;

async fn wait_for(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn active(handler: &Handler, tenant_id: Uuid) -> usize {
    handler
        .store()
        .all_for(tenant_id)
        .iter()
        .filter(|t| t.is_active())
        .count()
}

fn request() -> CreateTenant {
    CreateTenant {
        agency_code: "ABC".to_string(),
        name: "Agency of ABC".to_string(),
        contact_email: None,
    }
}

#[tokio::test]
#[serial]
#[ignore] // Requires Kafka
async fn test_kafka_outbox_to_license_provisioning() {
    let servers =
        std::env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let settings = KafkaSettings::new(servers, format!("license-e2e-{}", Uuid::new_v4()))
        .with_topic(format!("tenant-events-e2e-{}", Uuid::new_v4()));

    let store = Arc::new(InMemoryTenantStore::new());
    let tenants = TenantService::new(store.clone(), "tenant-service", DispatchMode::Outbox);
    let publisher = Arc::new(KafkaPublisher::new(&settings, "tenant-service").unwrap());
    let relay = OutboxRelay::new(store, publisher, RelaySettings::default());

    let handler: Arc<Handler> = Arc::new(license_type_handler(InMemoryResourceStore::new()));
    let router = Arc::new(EventRouter::new(handler.clone()).with_ledger(Arc::new(InMemoryLedger::new())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(
        ConsumerSource::Kafka(settings),
        router,
        LoopPolicies::default(),
        shutdown_rx,
    );

    let tenant = tenants.create_tenant(request()).await.unwrap();
    let report = relay.relay_once().await.unwrap();
    assert_eq!(report.published, 1);
    wait_for(|| active(&handler, tenant.id) == 3).await;

    tenants.delete_tenant(tenant.id).await.unwrap();
    relay.relay_once().await.unwrap();
    wait_for(|| active(&handler, tenant.id) == 0).await;

    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap().unwrap();
}

#[tokio::test]
#[serial]
#[ignore] // Requires Redis
async fn test_redis_immediate_dispatch_to_license_provisioning() {
    let connection =
        std::env::var("REDIS_CONNECTION").unwrap_or_else(|_| "localhost:6379".to_string());
    let settings = RedisSettings::parse(&connection)
        .unwrap()
        .with_channel(format!("tenant-events-e2e-{}", Uuid::new_v4()));

    let publisher = Arc::new(RedisPublisher::new(&settings, "tenant-service").unwrap());
    let tenants = TenantService::new(
        Arc::new(InMemoryTenantStore::new()),
        "tenant-service",
        DispatchMode::Immediate(publisher),
    );

    let handler: Arc<Handler> = Arc::new(license_type_handler(InMemoryResourceStore::new()));
    let router = Arc::new(EventRouter::new(handler.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = spawn_consumer(
        ConsumerSource::Redis(settings),
        router,
        LoopPolicies::default(),
        shutdown_rx,
    );

    // Pub/sub has no replay, so give the subscription time to register
    tokio::time::sleep(Duration::from_secs(2)).await;

    let tenant = tenants.create_tenant(request()).await.unwrap();
    wait_for(|| active(&handler, tenant.id) == 3).await;

    shutdown_tx.send(true).unwrap();
    consumer.await.unwrap().unwrap();
}
