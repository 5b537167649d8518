use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    entities::{plans::SubscriptionPlanEntity, subscription_events::SubscriptionEventEntity},
    value_objects::enums::service_categories::ServiceCategory,
};

fn required_uuid(field: &str, value: Option<&str>) -> Result<Uuid> {
    let raw = match value.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => bail!("{field} is required"),
    };
    Uuid::parse_str(raw).with_context(|| format!("{field} must be a valid UUID"))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateSubscriptionCommand {
    pub plan_id: Uuid,
}

impl CreateSubscriptionRequest {
    pub fn validate(&self) -> Result<CreateSubscriptionCommand> {
        Ok(CreateSubscriptionCommand {
            plan_id: required_uuid("plan_id", self.plan_id.as_deref())?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: Option<String>,
    /// Cancel at the end of the current billing cycle instead of right away.
    #[serde(default)]
    pub at_cycle_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelSubscriptionCommand {
    pub subscription_id: Uuid,
    pub at_cycle_end: bool,
}

impl CancelSubscriptionRequest {
    pub fn validate(&self) -> Result<CancelSubscriptionCommand> {
        Ok(CancelSubscriptionCommand {
            subscription_id: required_uuid("subscription_id", self.subscription_id.as_deref())?,
            at_cycle_end: self.at_cycle_end,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangePlanRequest {
    pub subscription_id: Option<String>,
    pub new_plan_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangePlanCommand {
    pub subscription_id: Uuid,
    pub new_plan_id: Uuid,
}

impl ChangePlanRequest {
    pub fn validate(&self) -> Result<ChangePlanCommand> {
        Ok(ChangePlanCommand {
            subscription_id: required_uuid("subscription_id", self.subscription_id.as_deref())?,
            new_plan_id: required_uuid("new_plan_id", self.new_plan_id.as_deref())?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionIdRequest {
    pub subscription_id: Option<String>,
}

impl SubscriptionIdRequest {
    pub fn validate(&self) -> Result<Uuid> {
        required_uuid("subscription_id", self.subscription_id.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ButtonStateQuery {
    pub category: String,
    pub plan_name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanDto {
    pub id: Uuid,
    pub name: String,
    pub category: ServiceCategory,
    pub price_minor: i32,
    pub billing_cycle_months: i32,
}

impl TryFrom<SubscriptionPlanEntity> for PlanDto {
    type Error = anyhow::Error;

    fn try_from(value: SubscriptionPlanEntity) -> Result<Self> {
        Ok(Self {
            category: value.category()?,
            id: value.id,
            name: value.name,
            price_minor: value.price_minor,
            billing_cycle_months: value.billing_cycle_months,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateSubscriptionResponse {
    pub subscription_id: Uuid,
    pub gateway_subscription_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancelSubscriptionResponse {
    pub subscription_id: Uuid,
    pub status: String,
    pub cancel_at_cycle_end: bool,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChangePlanResponse {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub total_count: i32,
    pub remaining_count: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentStatusResetResponse {
    pub subscription_id: Uuid,
    pub payment_status: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionEventDto {
    pub id: Uuid,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<SubscriptionEventEntity> for SubscriptionEventDto {
    fn from(value: SubscriptionEventEntity) -> Self {
        Self {
            id: value.id,
            event_type: value.event_type,
            metadata: value.metadata,
            created_at: value.created_at,
        }
    }
}
