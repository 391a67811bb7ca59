//! License type provisioning driven by encoded tenant events

use event_bus::{encode, IntegrationEvent, TenantCreated, TenantDeleted, TenantUpdated};
use event_consumer::{
    EventRouter, InMemoryLedger, InMemoryResourceStore, RouteOutcome, TenantResourceStore,
};
use license_rs::{license_type_handler, LicenseType, LicenseTypeHandler, PgLicenseTypeStore};
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

type MemoryHandler = LicenseTypeHandler<InMemoryResourceStore<LicenseType>>;

fn setup() -> (Arc<MemoryHandler>, EventRouter) {
    let handler = Arc::new(license_type_handler(InMemoryResourceStore::new()));
    let router = EventRouter::new(handler.clone()).with_ledger(Arc::new(InMemoryLedger::new()));
    (handler, router)
}

fn body<E: IntegrationEvent>(event: &E) -> Vec<u8> {
    encode(event, "tenant-service").unwrap().to_vec().unwrap()
}

#[tokio::test]
async fn test_new_tenant_gets_three_license_types() {
    let (handler, router) = setup();
    let tenant = Uuid::new_v4();

    let outcome = router
        .route(&body(&TenantCreated::new(tenant, "ABC", "Agency of ABC")))
        .await
        .unwrap();
    assert!(matches!(outcome, RouteOutcome::Handled(_)));

    let active = handler.store().list_active(tenant).await.unwrap();
    let mut codes: Vec<String> = active.into_iter().map(|t| t.code).collect();
    codes.sort();
    assert_eq!(codes, vec!["BUSINESS", "CONTRACTOR", "FOOD_SERVICE"]);
}

#[tokio::test]
async fn test_redelivered_created_event_keeps_three() {
    let (handler, router) = setup();
    let tenant = Uuid::new_v4();
    let created = body(&TenantCreated::new(tenant, "ABC", "Agency of ABC"));

    router.route(&created).await.unwrap();
    let outcome = router.route(&created).await.unwrap();
    assert!(matches!(outcome, RouteOutcome::Duplicate(_)));

    assert_eq!(handler.store().list_active(tenant).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_republished_created_event_keeps_three() {
    // A fresh envelope for the same fact bypasses the ledger; the existence check still holds
    let (handler, router) = setup();
    let tenant = Uuid::new_v4();
    let event = TenantCreated::new(tenant, "ABC", "Agency of ABC");

    router.route(&body(&event)).await.unwrap();
    router.route(&body(&event)).await.unwrap();

    assert_eq!(handler.store().list_active(tenant).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_update_leaves_license_types_alone() {
    let (handler, router) = setup();
    let tenant = Uuid::new_v4();
    router
        .route(&body(&TenantCreated::new(tenant, "ABC", "Agency of ABC")))
        .await
        .unwrap();
    let before = handler.store().list_active(tenant).await.unwrap();

    let updated = TenantUpdated {
        tenant_id: tenant,
        agency_code: "ABC".to_string(),
        name: "Renamed Agency".to_string(),
        contact_email: None,
        updated_at: chrono::Utc::now(),
    };
    router.route(&body(&updated)).await.unwrap();

    let mut after = handler.store().list_active(tenant).await.unwrap();
    let mut before = before;
    before.sort_by(|a, b| a.code.cmp(&b.code));
    after.sort_by(|a, b| a.code.cmp(&b.code));
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_delete_soft_deletes_all_license_types() {
    let (handler, router) = setup();
    let tenant = Uuid::new_v4();
    router
        .route(&body(&TenantCreated::new(tenant, "ABC", "Agency of ABC")))
        .await
        .unwrap();

    let deleted = TenantDeleted::new(tenant);
    router.route(&body(&deleted)).await.unwrap();

    assert!(handler.store().list_active(tenant).await.unwrap().is_empty());
    let all = handler.store().all_for(tenant);
    assert_eq!(all.len(), 3);
    assert!(all
        .iter()
        .all(|t| t.is_deleted && t.deleted_at == Some(deleted.deleted_at)));
}

#[tokio::test]
#[serial]
#[ignore] // Requires PostgreSQL (DATABASE_URL)
async fn test_postgres_store_seeds_once_and_soft_deletes() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .unwrap();
    let store = PgLicenseTypeStore::new(pool);
    store.ensure_schema().await.unwrap();

    let tenant = Uuid::new_v4();
    let defaults = license_rs::default_license_types(&TenantCreated::new(tenant, "ABC", "Agency"));
    assert_eq!(store.insert_all(&defaults).await.unwrap(), 3);
    assert_eq!(store.insert_all(&defaults).await.unwrap(), 0);
    assert!(store.has_resources(tenant).await.unwrap());

    assert_eq!(store.soft_delete_all(tenant, chrono::Utc::now()).await.unwrap(), 3);
    assert!(store.list_active(tenant).await.unwrap().is_empty());
    assert!(store.has_resources(tenant).await.unwrap());
}
