//! # Event Consumer
//!
//! Consumer-side plumbing shared by every downstream service:
//!
//! - [`EventRouter`]: decode an envelope, check the idempotency ledger,
//!   dispatch to the service's [`TenantEventHandler`]
//! - [`run_log_consumer`]: at-least-once loop with manual offset commits
//!   (Kafka, [`InMemoryLog`](event_bus::InMemoryLog))
//! - [`run_pubsub_subscriber`]: fire-and-forget loop with reconnects
//!   (Redis, [`InMemoryBus`](event_bus::InMemoryBus))
//! - [`ProvisioningHandler`]: seed/soft-delete of one kind of tenant-scoped
//!   default data, backed by a [`TenantResourceStore`]
//!
//! ## Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use event_bus::{InMemoryLog, TenantCreated, TenantDeleted};
//! use event_consumer::{run_log_consumer, EventContext, EventRouter, RedeliveryPolicy, TenantEventHandler};
//! use std::sync::Arc;
//!
//! struct LicenseTypes;
//!
//! #[async_trait]
//! impl TenantEventHandler for LicenseTypes {
//!     fn service_name(&self) -> &str {
//!         "license-service"
//!     }
//!
//!     async fn on_tenant_created(&self, event: &TenantCreated, _ctx: &EventContext) -> anyhow::Result<()> {
//!         println!("seed license types for {}", event.tenant_id);
//!         Ok(())
//!     }
//!
//!     async fn on_tenant_deleted(&self, event: &TenantDeleted, _ctx: &EventContext) -> anyhow::Result<()> {
//!         println!("retire license types for {}", event.tenant_id);
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = InMemoryLog::new("tenant-events", 3, "tenant-service");
//! let router = EventRouter::new(Arc::new(LicenseTypes));
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let consumer = log.consumer("license-service");
//! shutdown_tx.send(true)?;
//! run_log_consumer(consumer, &router, &RedeliveryPolicy::default(), shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

mod handler;
mod idempotency;
mod log_loop;
mod metrics;
mod provisioning;
mod pubsub_loop;
mod router;
mod runtime;
#[cfg(test)]
mod testing;

pub use handler::{EventContext, TenantEventHandler};
pub use idempotency::{idempotency_key, IdempotencyLedger, InMemoryLedger, LedgerEntry, LedgerError, PgLedger};
pub use log_loop::{run_log_consumer, RedeliveryPolicy};
pub use metrics::{metrics_router, ConsumerMetrics, MetricsSnapshot};
pub use provisioning::{InMemoryResourceStore, ProvisioningHandler, StoreError, TenantResource, TenantResourceStore};
pub use pubsub_loop::{run_pubsub_subscriber, SubscriberPolicy};
pub use router::{EventRouter, RouteError, RouteOutcome};
pub use runtime::{spawn_consumer, ConsumerSource, LoopPolicies};
