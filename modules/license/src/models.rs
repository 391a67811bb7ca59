use chrono::{DateTime, Utc};
use event_bus::TenantCreated;
use event_consumer::TenantResource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A kind of license a tenant agency issues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LicenseType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    /// Validity of an issued license before renewal
    pub term_months: i32,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LicenseType {
    pub fn new(tenant_id: Uuid, code: &str, name: &str, description: &str, term_months: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            code: code.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            term_months,
            is_deleted: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

impl TenantResource for LicenseType {
    fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    fn natural_key(&self) -> &str {
        &self.code
    }

    fn is_active(&self) -> bool {
        !self.is_deleted
    }

    fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(at);
    }
}

/// The three license types every new agency starts with
pub fn default_license_types(event: &TenantCreated) -> Vec<LicenseType> {
    vec![
        LicenseType::new(
            event.tenant_id,
            "BUSINESS",
            "Business License",
            "General license to operate a business within the jurisdiction",
            12,
        ),
        LicenseType::new(
            event.tenant_id,
            "CONTRACTOR",
            "Contractor License",
            "License for building and trade contractors",
            24,
        ),
        LicenseType::new(
            event.tenant_id,
            "FOOD_SERVICE",
            "Food Service Permit",
            "Permit for establishments preparing or serving food",
            12,
        ),
    ]
}
