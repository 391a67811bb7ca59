use chrono::{DateTime, Utc};
use event_bus::TenantCreated;
use event_consumer::TenantResource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const SEVEN_YEARS: i32 = 7 * 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentCategory {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    /// Days a document is kept after its license closes
    pub retention_days: i32,
    /// Uploads land in a review queue before they count
    pub requires_review: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TenantResource for DocumentCategory {
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

pub fn default_document_categories(event: &TenantCreated) -> Vec<DocumentCategory> {
    [
        ("APPLICATION", "Application Forms", SEVEN_YEARS, false),
        ("IDENTITY", "Proof of Identity", SEVEN_YEARS, true),
        ("INSPECTION_REPORT", "Inspection Reports", SEVEN_YEARS, true),
        ("CERTIFICATE", "Issued Certificates", 10 * 365, false),
        ("CORRESPONDENCE", "Correspondence", 3 * 365, false),
    ]
    .into_iter()
    .map(|(code, name, retention_days, requires_review)| DocumentCategory {
        id: Uuid::new_v4(),
        tenant_id: event.tenant_id,
        code: code.to_string(),
        name: name.to_string(),
        retention_days,
        requires_review,
        is_deleted: false,
        created_at: Utc::now(),
        deleted_at: None,
    })
    .collect()
}
