//! Tenant and outbox persistence
//!
//! [`TenantStore::commit`] writes tenant rows and outbox rows together: both
//! land or neither does. The relay side of the outbox lives on
//! [`OutboxStore`].

use crate::outbox::{OutboxRecord, OutboxStatus};
use crate::tenant::{AggregateRoot, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("agency code '{0}' is already in use")]
    DuplicateAgencyCode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>, StoreError>;

    async fn find_by_agency_code(&self, agency_code: &str) -> Result<Option<Tenant>, StoreError>;

    /// Upsert `tenants` and append `outbox` in a single atomic commit
    async fn commit(&self, tenants: &[Tenant], outbox: &[OutboxRecord]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest pending records first, skipping any whose partition key has an
    /// earlier `failed` record
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError>;

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Count a failed attempt; the record becomes `failed` once `attempts` reaches `max_attempts`
    async fn record_failure(&self, id: Uuid, error: &str, max_attempts: i32) -> Result<OutboxStatus, StoreError>;

    /// Put the `failed` records of `partition_key` back to `pending` with a fresh attempt count
    async fn requeue_failed(&self, partition_key: &str) -> Result<u64, StoreError>;

    /// Delete `published` records published before `before`
    async fn purge_published(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    tenants: HashMap<Uuid, Tenant>,
    outbox: Vec<OutboxRecord>,
    fail_next_commit: bool,
}

/// Store kept in process memory, for tests and local runs without `DATABASE_URL`
#[derive(Default)]
pub struct InMemoryTenantStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail without writing anything
    pub fn fail_next_commit(&self) {
        self.lock().fail_next_commit = true;
    }

    pub fn outbox(&self) -> Vec<OutboxRecord> {
        self.lock().outbox.clone()
    }

    pub fn tenant_count(&self) -> usize {
        self.lock().tenants.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get(&self, id: Uuid) -> Result<Option<Tenant>, StoreError> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn find_by_agency_code(&self, agency_code: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self
            .lock()
            .tenants
            .values()
            .find(|t| t.agency_code == agency_code)
            .cloned())
    }

    async fn commit(&self, tenants: &[Tenant], outbox: &[OutboxRecord]) -> Result<(), StoreError> {
        let mut state = self.lock();

        if std::mem::take(&mut state.fail_next_commit) {
            return Err(StoreError::Unavailable("simulated commit failure".to_string()));
        }

        for tenant in tenants {
            let taken = state
                .tenants
                .values()
                .any(|t| t.agency_code == tenant.agency_code && t.id != tenant.id);
            if taken {
                return Err(StoreError::DuplicateAgencyCode(tenant.agency_code.clone()));
            }
        }

        for tenant in tenants {
            let mut stored = tenant.clone();
            stored.clear_events();
            state.tenants.insert(stored.id, stored);
        }
        state.outbox.extend(outbox.iter().cloned());
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryTenantStore {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.lock();
        let mut parked_keys: HashSet<&str> = HashSet::new();
        let mut pending = Vec::new();

        for record in &state.outbox {
            if pending.len() >= limit.max(0) as usize {
                break;
            }
            match record.status {
                OutboxStatus::Failed => {
                    parked_keys.insert(record.partition_key.as_str());
                }
                OutboxStatus::Pending if !parked_keys.contains(record.partition_key.as_str()) => {
                    pending.push(record.clone());
                }
                _ => {}
            }
        }
        Ok(pending)
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(record) = self.lock().outbox.iter_mut().find(|r| r.id == id) {
            record.status = OutboxStatus::Published;
            record.published_at = Some(at);
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str, max_attempts: i32) -> Result<OutboxStatus, StoreError> {
        let mut state = self.lock();
        let Some(record) = state.outbox.iter_mut().find(|r| r.id == id) else {
            return Ok(OutboxStatus::Failed);
        };

        record.attempts += 1;
        record.last_error = Some(error.to_string());
        if record.attempts >= max_attempts {
            record.status = OutboxStatus::Failed;
        }
        Ok(record.status)
    }

    async fn requeue_failed(&self, partition_key: &str) -> Result<u64, StoreError> {
        let mut requeued = 0;
        for record in self
            .lock()
            .outbox
            .iter_mut()
            .filter(|r| r.status == OutboxStatus::Failed && r.partition_key == partition_key)
        {
            record.status = OutboxStatus::Pending;
            record.attempts = 0;
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn purge_published(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let count = state.outbox.len();
        state.outbox.retain(|r| {
            !(r.status == OutboxStatus::Published && r.published_at.is_some_and(|at| at < before))
        });
        Ok((count - state.outbox.len()) as u64)
    }
}
