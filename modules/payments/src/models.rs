use chrono::{DateTime, Utc};
use event_bus::TenantCreated;
use event_consumer::TenantResource;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "USD";

/// A fee an agency charges, amounts in minor units (cents)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeeSchedule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub amount_minor: i64,
    pub currency: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FeeSchedule {
    fn seed(tenant_id: Uuid, code: &str, name: &str, amount_minor: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            code: code.to_string(),
            name: name.to_string(),
            amount_minor,
            currency: DEFAULT_CURRENCY.to_string(),
            is_deleted: false,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

impl TenantResource for FeeSchedule {
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

pub fn default_fee_schedules(event: &TenantCreated) -> Vec<FeeSchedule> {
    vec![
        FeeSchedule::seed(event.tenant_id, "APPLICATION_FEE", "Application Fee", 5_000),
        FeeSchedule::seed(event.tenant_id, "RENEWAL_FEE", "Renewal Fee", 2_500),
        FeeSchedule::seed(event.tenant_id, "LATE_FEE", "Late Renewal Penalty", 1_500),
        FeeSchedule::seed(event.tenant_id, "INSPECTION_FEE", "Inspection Fee", 7_500),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fees_are_positive_usd() {
        let fees = default_fee_schedules(&TenantCreated::new(Uuid::new_v4(), "ABC", "Agency"));
        assert_eq!(fees.len(), 4);
        assert!(fees.iter().all(|f| f.amount_minor > 0 && f.currency == "USD"));
    }
}
