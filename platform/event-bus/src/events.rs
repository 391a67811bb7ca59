//! Tenant lifecycle events
//!
//! These are notifications, not an event store: the Tenant service raises
//! them while mutating a tenant, ships them once, and forgets them.
//! Payload field names are PascalCase on the wire.

use crate::{BusError, BusResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event that can be wrapped in an [`IntegrationEnvelope`](crate::IntegrationEnvelope)
pub trait IntegrationEvent: Send {
    /// Simple type name written to `EventType`; consumers route on it
    fn event_type(&self) -> &'static str;

    /// Partition affinity key. `None` means any partition will do.
    fn partition_key(&self) -> Option<String> {
        None
    }

    /// Serialized event body written to `Payload`
    fn to_payload(&self) -> serde_json::Result<String>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TenantCreated {
    pub tenant_id: Uuid,
    pub agency_code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TenantCreated {
    pub fn new(tenant_id: Uuid, agency_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            agency_code: agency_code.into(),
            name: name.into(),
            contact_email: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TenantUpdated {
    pub tenant_id: Uuid,
    pub agency_code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TenantDeleted {
    pub tenant_id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

impl TenantDeleted {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            deleted_at: Utc::now(),
        }
    }
}

macro_rules! tenant_integration_event {
    ($ty:ident) => {
        impl IntegrationEvent for $ty {
            fn event_type(&self) -> &'static str {
                stringify!($ty)
            }

            fn partition_key(&self) -> Option<String> {
                Some(self.tenant_id.to_string())
            }

            fn to_payload(&self) -> serde_json::Result<String> {
                serde_json::to_string(self)
            }
        }
    };
}

tenant_integration_event!(TenantCreated);
tenant_integration_event!(TenantUpdated);
tenant_integration_event!(TenantDeleted);

/// The closed set of event kinds consumers know how to route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    TenantCreated,
    TenantUpdated,
    TenantDeleted,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::TenantCreated,
        EventKind::TenantUpdated,
        EventKind::TenantDeleted,
    ];

    pub fn type_name(self) -> &'static str {
        match self {
            EventKind::TenantCreated => "TenantCreated",
            EventKind::TenantUpdated => "TenantUpdated",
            EventKind::TenantDeleted => "TenantDeleted",
        }
    }

    /// Look up a kind by its `EventType` string. Unknown names yield `None`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_name() == name)
    }
}

/// Any tenant lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantEvent {
    Created(TenantCreated),
    Updated(TenantUpdated),
    Deleted(TenantDeleted),
}

impl TenantEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TenantEvent::Created(_) => EventKind::TenantCreated,
            TenantEvent::Updated(_) => EventKind::TenantUpdated,
            TenantEvent::Deleted(_) => EventKind::TenantDeleted,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            TenantEvent::Created(e) => e.tenant_id,
            TenantEvent::Updated(e) => e.tenant_id,
            TenantEvent::Deleted(e) => e.tenant_id,
        }
    }

    /// Deserialize `payload` as the typed event for `kind`
    pub fn decode(kind: EventKind, payload: &str) -> BusResult<Self> {
        let event = match kind {
            EventKind::TenantCreated => TenantEvent::Created(serde_json::from_str(payload)?),
            EventKind::TenantUpdated => TenantEvent::Updated(serde_json::from_str(payload)?),
            EventKind::TenantDeleted => TenantEvent::Deleted(serde_json::from_str(payload)?),
        };
        Ok(event)
    }

    /// Deserialize a payload routed by its raw `EventType` string
    pub fn decode_named(event_type: &str, payload: &str) -> BusResult<Self> {
        let kind = EventKind::from_type_name(event_type).ok_or_else(|| {
            BusError::MalformedEnvelope(format!("unknown event type '{}'", event_type))
        })?;
        Self::decode(kind, payload)
    }
}

impl IntegrationEvent for TenantEvent {
    fn event_type(&self) -> &'static str {
        self.kind().type_name()
    }

    fn partition_key(&self) -> Option<String> {
        Some(self.tenant_id().to_string())
    }

    fn to_payload(&self) -> serde_json::Result<String> {
        match self {
            TenantEvent::Created(e) => e.to_payload(),
            TenantEvent::Updated(e) => e.to_payload(),
            TenantEvent::Deleted(e) => e.to_payload(),
        }
    }
}

impl From<TenantCreated> for TenantEvent {
    fn from(e: TenantCreated) -> Self {
        TenantEvent::Created(e)
    }
}

impl From<TenantUpdated> for TenantEvent {
    fn from(e: TenantUpdated) -> Self {
        TenantEvent::Updated(e)
    }
}

impl From<TenantDeleted> for TenantEvent {
    fn from(e: TenantDeleted) -> Self {
        TenantEvent::Deleted(e)
    }
}
