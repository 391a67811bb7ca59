//! Unit of work with domain event dispatch
//!
//! Tracked aggregates are saved together. Their pending events are collected
//! in tracking order and either staged in the outbox inside the same commit
//! ([`DispatchMode::Outbox`]) or published right after the commit
//! ([`DispatchMode::Immediate`]).

use crate::outbox::OutboxRecord;
use crate::store::{StoreError, TenantStore};
use crate::tenant::{AggregateRoot, Tenant};
use event_bus::{BusError, EventPublisher, EventPublisherExt, PublishOptions, TenantEvent};
use std::sync::Arc;

#[derive(Clone)]
pub enum DispatchMode {
    /// Events become outbox rows in the tenant commit; the relay ships them
    Outbox,
    /// Publish after the commit. A broker failure leaves the commit in place
    /// and the event unsent.
    Immediate(Arc<dyn EventPublisher>),
}

impl std::fmt::Debug for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Outbox => write!(f, "Outbox"),
            DispatchMode::Immediate(p) => write!(f, "Immediate({})", p.name()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit failed: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode event: {0}")]
    Encode(#[source] BusError),

    /// The tenant change is committed; `published` events went out before the failure
    #[error("committed, but publishing failed after {published} event(s): {source}")]
    Publish {
        published: usize,
        #[source]
        source: BusError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    pub tenants: usize,
    /// Outbox rows written (outbox mode) or events published (immediate mode)
    pub events: usize,
}

pub struct UnitOfWork<'a, S: TenantStore + ?Sized> {
    store: &'a S,
    source_service: &'a str,
    mode: DispatchMode,
    tracked: Vec<Tenant>,
}

impl<'a, S: TenantStore + ?Sized> UnitOfWork<'a, S> {
    pub fn new(store: &'a S, source_service: &'a str, mode: DispatchMode) -> Self {
        Self {
            store,
            source_service,
            mode,
            tracked: Vec::new(),
        }
    }

    pub fn track(&mut self, tenant: Tenant) {
        match self.tracked.iter_mut().find(|t| t.id == tenant.id) {
            Some(existing) => *existing = tenant,
            None => self.tracked.push(tenant),
        }
    }

    pub fn tenants(&self) -> &[Tenant] {
        &self.tracked
    }

    /// Persist every tracked tenant and dispatch their pending events.
    ///
    /// A failed commit leaves all pending events on the aggregates. After a
    /// successful commit the events are cleared, also in immediate mode when
    /// publishing failed.
    pub async fn save_changes(&mut self) -> Result<SaveOutcome, CommitError> {
        let events: Vec<TenantEvent> = self
            .tracked
            .iter()
            .flat_map(|t| t.pending_events().iter().cloned())
            .collect();

        let outcome = match self.mode.clone() {
            DispatchMode::Outbox => {
                let records = events
                    .iter()
                    .map(|e| OutboxRecord::for_event(e, self.source_service))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(CommitError::Encode)?;

                self.store.commit(&self.tracked, &records).await?;
                self.clear_events();

                tracing::debug!(staged = records.len(), "Domain events staged in outbox");
                SaveOutcome {
                    tenants: self.tracked.len(),
                    events: records.len(),
                }
            }
            DispatchMode::Immediate(publisher) => {
                self.store.commit(&self.tracked, &[]).await?;
                self.clear_events();

                let mut published = 0;
                for event in &events {
                    if let Err(source) = publisher.publish(event, &PublishOptions::default()).await {
                        tracing::error!(
                            event_type = %event.kind().type_name(),
                            tenant_id = %event.tenant_id(),
                            published,
                            error = %source,
                            "Failed to publish domain event after commit"
                        );
                        return Err(CommitError::Publish { published, source });
                    }
                    published += 1;
                }

                SaveOutcome {
                    tenants: self.tracked.len(),
                    events: published,
                }
            }
        };

        Ok(outcome)
    }

    fn clear_events(&mut self) {
        for tenant in &mut self.tracked {
            tenant.clear_events();
        }
    }
}
