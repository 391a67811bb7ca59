use chrono::{DateTime, Utc};
use event_bus::TenantCreated;
use event_consumer::TenantResource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CHANNEL_EMAIL: &str = "email";
pub const CHANNEL_SMS: &str = "sms";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    /// `email` or `sms`
    pub channel: String,
    pub subject: String,
    /// Body with `{{placeholder}}` fields filled at send time
    pub body: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NotificationTemplate {
    pub fn new(tenant_id: Uuid, code: &str, channel: &str, subject: String, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            code: code.to_string(),
            channel: channel.to_string(),
            subject,
            body,
            is_deleted: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

impl TenantResource for NotificationTemplate {
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

/// Starter templates, signed with the agency's name
pub fn default_notification_templates(event: &TenantCreated) -> Vec<NotificationTemplate> {
    let agency = &event.name;
    vec![
        NotificationTemplate::new(
            event.tenant_id,
            "APPLICATION_RECEIVED",
            CHANNEL_EMAIL,
            format!("{}: application received", agency),
            format!(
                "Hello {{{{applicant_name}}}},\n\nWe received your application {{{{application_number}}}}.\n\n{}",
                agency
            ),
        ),
        NotificationTemplate::new(
            event.tenant_id,
            "LICENSE_ISSUED",
            CHANNEL_EMAIL,
            format!("{}: your license has been issued", agency),
            format!(
                "Hello {{{{applicant_name}}}},\n\nLicense {{{{license_number}}}} is active until {{{{expires_on}}}}.\n\n{}",
                agency
            ),
        ),
        NotificationTemplate::new(
            event.tenant_id,
            "RENEWAL_REMINDER",
            CHANNEL_EMAIL,
            format!("{}: license renewal due", agency),
            format!(
                "Hello {{{{applicant_name}}}},\n\nLicense {{{{license_number}}}} expires on {{{{expires_on}}}}. Please renew.\n\n{}",
                agency
            ),
        ),
        NotificationTemplate::new(
            event.tenant_id,
            "PAYMENT_RECEIPT_SMS",
            CHANNEL_SMS,
            format!("{} payment", agency),
            format!("{}: payment of {{{{amount}}}} received. Ref {{{{reference}}}}.", agency),
        ),
    ]
}
