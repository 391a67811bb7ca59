//! Tenant aggregate
//!
//! State transitions raise domain events into the aggregate's pending list.
//! Nothing is published from here; the unit of work collects and dispatches
//! pending events when the change is saved.

use chrono::{DateTime, Utc};
use event_bus::{TenantCreated, TenantDeleted, TenantEvent, TenantUpdated};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("agency code is required")]
    MissingAgencyCode,

    #[error("agency code '{0}' must be 2-16 uppercase letters or digits")]
    InvalidAgencyCode(String),

    #[error("tenant name is required")]
    MissingName,

    #[error("tenant {0} is deleted")]
    Deleted(Uuid),

    #[error("tenant {0} not found")]
    NotFound(Uuid),

    #[error("agency code '{0}' is already in use")]
    DuplicateAgencyCode(String),
}

/// Anything the unit of work can collect domain events from
pub trait AggregateRoot {
    fn pending_events(&self) -> &[TenantEvent];

    fn clear_events(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: Uuid,
    pub agency_code: String,
    pub name: String,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pending_events: Vec<TenantEvent>,
}

impl Tenant {
    /// Register a new agency. Raises `TenantCreated`.
    pub fn create(
        agency_code: &str,
        name: &str,
        contact_email: Option<String>,
    ) -> Result<Self, TenantError> {
        let agency_code = normalize_agency_code(agency_code)?;
        let name = required_name(name)?;
        let now = Utc::now();

        let mut tenant = Self {
            id: Uuid::new_v4(),
            agency_code,
            name,
            contact_email,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            pending_events: Vec::new(),
        };

        tenant.raise(TenantCreated {
            tenant_id: tenant.id,
            agency_code: tenant.agency_code.clone(),
            name: tenant.name.clone(),
            contact_email: tenant.contact_email.clone(),
            created_at: now,
        });
        Ok(tenant)
    }

    /// Rebuild from storage; no events are raised
    pub fn restore(
        id: Uuid,
        agency_code: String,
        name: String,
        contact_email: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deleted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            agency_code,
            name,
            contact_email,
            created_at,
            updated_at,
            deleted_at,
            pending_events: Vec::new(),
        }
    }

    /// Rename or change contact details. Raises `TenantUpdated`.
    pub fn update(&mut self, name: &str, contact_email: Option<String>) -> Result<(), TenantError> {
        self.ensure_active()?;
        self.name = required_name(name)?;
        self.contact_email = contact_email;
        self.updated_at = Utc::now();

        self.raise(TenantUpdated {
            tenant_id: self.id,
            agency_code: self.agency_code.clone(),
            name: self.name.clone(),
            contact_email: self.contact_email.clone(),
            updated_at: self.updated_at,
        });
        Ok(())
    }

    /// Soft-delete. Raises `TenantDeleted`.
    pub fn delete(&mut self) -> Result<(), TenantError> {
        self.ensure_active()?;
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;

        self.raise(TenantDeleted {
            tenant_id: self.id,
            deleted_at: now,
        });
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    fn ensure_active(&self) -> Result<(), TenantError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TenantError::Deleted(self.id))
        }
    }

    fn raise(&mut self, event: impl Into<TenantEvent>) {
        self.pending_events.push(event.into());
    }
}

impl AggregateRoot for Tenant {
    fn pending_events(&self) -> &[TenantEvent] {
        &self.pending_events
    }

    fn clear_events(&mut self) {
        self.pending_events.clear();
    }
}

fn normalize_agency_code(raw: &str) -> Result<String, TenantError> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(TenantError::MissingAgencyCode);
    }
    if !(2..=16).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(TenantError::InvalidAgencyCode(raw.to_string()));
    }
    Ok(code)
}

fn required_name(raw: &str) -> Result<String, TenantError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TenantError::MissingName);
    }
    Ok(name.to_string())
}
