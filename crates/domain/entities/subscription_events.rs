use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::subscription_events;

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscription_events)]
pub struct SubscriptionEventEntity {
    pub id: Uuid,
    pub event_type: String,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit record. There is no update or delete path for events.
#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = subscription_events)]
pub struct InsertSubscriptionEventEntity {
    pub event_type: String,
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl InsertSubscriptionEventEntity {
    pub fn for_subscription(
        event_type: impl Into<String>,
        user_id: Uuid,
        subscription_id: Uuid,
        plan_id: Uuid,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            user_id,
            subscription_id: Some(subscription_id),
            plan_id: Some(plan_id),
            metadata,
        }
    }
}

/// Event types written by the command handlers. Reconciled webhook events
/// are logged under the gateway's own event name.
pub mod event_types {
    pub const SUBSCRIPTION_CREATED: &str = "subscription_created";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    pub const PLAN_CHANGED: &str = "plan_changed";
    pub const PAYMENT_STATUS_RESET: &str = "payment_status_reset";
}
