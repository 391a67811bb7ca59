//! Processed-event ledger
//!
//! Tenant events carry no event id, so a delivery is identified by hashing
//! the envelope fields that stay fixed across redeliveries of the same
//! publish. A re-published envelope (outbox relay retry) keeps its
//! timestamp and correlation id and therefore maps to the same key.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use event_bus::IntegrationEnvelope;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// SHA-256 over `EventType|TenantId|Timestamp|CorrelationId`, hex encoded
///
/// `TenantId` is read from the payload; payloads without one hash an
/// empty segment.
pub fn idempotency_key(envelope: &IntegrationEnvelope) -> String {
    let tenant_id = tenant_id_of(envelope)
        .map(|id| id.to_string())
        .unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(envelope.event_type.as_bytes());
    hasher.update(b"|");
    hasher.update(tenant_id.as_bytes());
    hasher.update(b"|");
    hasher.update(
        envelope
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update(b"|");
    hasher.update(envelope.correlation_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn tenant_id_of(envelope: &IntegrationEnvelope) -> Option<Uuid> {
    let payload: serde_json::Value = serde_json::from_str(&envelope.payload).ok()?;
    payload
        .get("TenantId")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub idempotency_key: String,
    pub event_type: String,
    pub tenant_id: Option<Uuid>,
    pub processed_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn for_envelope(envelope: &IntegrationEnvelope, key: String) -> Self {
        Self {
            idempotency_key: key,
            event_type: envelope.event_type.clone(),
            tenant_id: tenant_id_of(envelope),
            processed_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    async fn is_processed(&self, key: &str) -> Result<bool, LedgerError>;

    /// Record a processed delivery. Recording the same key twice is not an error.
    async fn mark_processed(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;
}

/// Ledger kept in process memory; forgets everything on restart
#[derive(Default)]
pub struct InMemoryLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn is_processed(&self, key: &str) -> Result<bool, LedgerError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.contains_key(key))
    }

    async fn mark_processed(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(entry.idempotency_key.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }
}

/// Ledger in the service's own database (`processed_tenant_events`)
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyLedger for PgLedger {
    async fn is_processed(&self, key: &str) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(SELECT 1 FROM processed_tenant_events WHERE idempotency_key = $1)
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_processed(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO processed_tenant_events (idempotency_key, event_type, tenant_id, processed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(&entry.idempotency_key)
        .bind(&entry.event_type)
        .bind(entry.tenant_id)
        .bind(entry.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::{encode, TenantCreated, TenantDeleted};

    #[test]
    fn test_key_is_stable_for_same_envelope() {
        let envelope = encode(&TenantDeleted::new(Uuid::new_v4()), "tenant-service").unwrap();
        let redelivered = IntegrationEnvelope::from_slice(&envelope.to_vec().unwrap()).unwrap();

        assert_eq!(idempotency_key(&envelope), idempotency_key(&redelivered));
        assert_eq!(idempotency_key(&envelope).len(), 64);
    }

    #[test]
    fn test_key_differs_per_publish() {
        let event = TenantCreated::new(Uuid::new_v4(), "ABC", "Agency of ABC");
        let first = encode(&event, "tenant-service").unwrap();
        let second = encode(&event, "tenant-service").unwrap();

        assert_ne!(idempotency_key(&first), idempotency_key(&second));
    }

    #[test]
    fn test_key_depends_on_tenant() {
        let envelope = encode(&TenantDeleted::new(Uuid::new_v4()), "tenant-service").unwrap();
        let mut other = envelope.clone();
        other.payload = serde_json::to_string(&TenantDeleted {
            tenant_id: Uuid::new_v4(),
            deleted_at: envelope.timestamp,
        })
        .unwrap();

        assert_ne!(idempotency_key(&envelope), idempotency_key(&other));
    }

    #[test]
    fn test_entry_extracts_tenant_id() {
        let tenant = Uuid::new_v4();
        let envelope = encode(&TenantDeleted::new(tenant), "tenant-service").unwrap();
        let entry = LedgerEntry::for_envelope(&envelope, idempotency_key(&envelope));

        assert_eq!(entry.tenant_id, Some(tenant));
        assert_eq!(entry.event_type, "TenantDeleted");
    }

    #[tokio::test]
    async fn test_in_memory_ledger_marks_once() {
        let ledger = InMemoryLedger::new();
        let envelope = encode(&TenantDeleted::new(Uuid::new_v4()), "tenant-service").unwrap();
        let key = idempotency_key(&envelope);

        assert!(!ledger.is_processed(&key).await.unwrap());
        let entry = LedgerEntry::for_envelope(&envelope, key.clone());
        ledger.mark_processed(&entry).await.unwrap();
        ledger.mark_processed(&entry).await.unwrap();

        assert!(ledger.is_processed(&key).await.unwrap());
        assert_eq!(ledger.len(), 1);
    }
}
