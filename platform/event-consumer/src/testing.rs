//! Test doubles for exercising consumer loops without a real service

use crate::handler::{EventContext, TenantEventHandler};
use async_trait::async_trait;
use event_bus::{EventKind, TenantCreated, TenantDeleted, TenantUpdated};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Records every successful call; optionally fails the first `n` calls
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<(EventKind, Uuid)>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl RecordingHandler {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            ..Self::default()
        }
    }

    /// Successful calls, in order
    pub fn calls(&self) -> Vec<(EventKind, Uuid)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every call, including the ones that failed
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, kind: EventKind, tenant_id: Uuid) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("simulated handler failure");
        }

        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, tenant_id));
        Ok(())
    }
}

#[async_trait]
impl TenantEventHandler for RecordingHandler {
    fn service_name(&self) -> &str {
        "recording-service"
    }

    async fn on_tenant_created(&self, event: &TenantCreated, _ctx: &EventContext) -> anyhow::Result<()> {
        self.record(EventKind::TenantCreated, event.tenant_id)
    }

    async fn on_tenant_updated(&self, event: &TenantUpdated, _ctx: &EventContext) -> anyhow::Result<()> {
        self.record(EventKind::TenantUpdated, event.tenant_id)
    }

    async fn on_tenant_deleted(&self, event: &TenantDeleted, _ctx: &EventContext) -> anyhow::Result<()> {
        self.record(EventKind::TenantDeleted, event.tenant_id)
    }
}
