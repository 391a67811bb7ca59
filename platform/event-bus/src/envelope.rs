//! # Integration Envelope
//!
//! Wire wrapper shared by every backend. The broker body is always the JSON
//! form of [`IntegrationEnvelope`]:
//!
//! ```text
//! { "EventType": "TenantCreated", "Payload": "{...}", "Timestamp": "2024-01-01T00:00:00Z",
//!   "CorrelationId": "…", "SourceService": "tenant-service" }
//! ```
//!
//! `Payload` is itself a JSON *string*. Typed deserialization happens at the
//! consumer's dispatch site, which picks the type from `EventType`.

use crate::events::IntegrationEvent;
use crate::{BusError, BusResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntegrationEnvelope {
    /// Simple type name of the embedded event
    pub event_type: String,
    /// Serialized event body
    pub payload: String,
    /// UTC time the envelope was created
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub source_service: String,
}

impl IntegrationEnvelope {
    /// Replace the generated correlation id (e.g. to propagate an upstream request id)
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn to_vec(&self) -> BusResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn to_json(&self) -> BusResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a broker message body
    pub fn from_slice(bytes: &[u8]) -> BusResult<Self> {
        let envelope: Self = serde_json::from_slice(bytes)?;
        if envelope.event_type.is_empty() {
            return Err(BusError::MalformedEnvelope("EventType cannot be empty".to_string()));
        }
        Ok(envelope)
    }
}

/// Wrap `event` for the wire, stamping the current time and a fresh correlation id
pub fn encode<E: IntegrationEvent + ?Sized>(
    event: &E,
    source_service: &str,
) -> BusResult<IntegrationEnvelope> {
    Ok(IntegrationEnvelope {
        event_type: event.event_type().to_string(),
        payload: event.to_payload()?,
        timestamp: Utc::now(),
        correlation_id: Uuid::new_v4().to_string(),
        source_service: source_service.to_string(),
    })
}

/// Project an envelope back to `(event_type, payload)`
pub fn decode(envelope: &IntegrationEnvelope) -> (&str, &str) {
    (&envelope.event_type, &envelope.payload)
}

/// Validate an envelope given as raw JSON
///
/// # Validation Rules
///
/// - `EventType`, `Payload`, `CorrelationId`, `SourceService`: present, non-empty strings
/// - `Timestamp`: present, RFC 3339
pub fn validate_envelope_fields(envelope: &serde_json::Value) -> Result<(), String> {
    for field in ["EventType", "Payload", "CorrelationId", "SourceService"] {
        let value = envelope
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Missing or invalid {}", field))?;

        if value.is_empty() {
            return Err(format!("{} cannot be empty", field));
        }
    }

    let timestamp = envelope
        .get("Timestamp")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid Timestamp")?;

    DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| format!("Timestamp is not RFC 3339: {}", e))?;

    Ok(())
}
