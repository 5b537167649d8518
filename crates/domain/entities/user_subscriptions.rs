use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::{
        entities::plans::SubscriptionPlanEntity,
        value_objects::enums::{
            payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus,
        },
    },
    infra::db::postgres::schema::user_subscriptions,
};

#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = user_subscriptions)]
pub struct UserSubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub gateway_subscription_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub current_cycle_start: Option<DateTime<Utc>>,
    pub current_cycle_end: Option<DateTime<Utc>>,
    pub total_count: i32,
    pub paid_count: i32,
    pub remaining_count: i32,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub cancel_at_cycle_end: bool,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSubscriptionEntity {
    pub fn status(&self) -> Result<SubscriptionStatus> {
        self.status.parse()
    }

    pub fn payment_status(&self) -> Result<PaymentStatus> {
        self.payment_status.parse()
    }

    pub fn is_cancellation_scheduled(&self) -> bool {
        self.cancel_at_cycle_end
    }

    /// Returns the row as it would look after `changes` were written.
    /// Bookkeeping columns (`version`, `updated_at`) are left untouched.
    pub fn with_changes(&self, changes: &UserSubscriptionChangeset) -> Self {
        let mut next = self.clone();
        if let Some(plan_id) = changes.plan_id {
            next.plan_id = plan_id;
        }
        if let Some(status) = &changes.status {
            next.status = status.clone();
        }
        if let Some(payment_status) = &changes.payment_status {
            next.payment_status = payment_status.clone();
        }
        if let Some(start_date) = changes.start_date {
            next.start_date = start_date;
        }
        if let Some(end_date) = changes.end_date {
            next.end_date = end_date;
        }
        if let Some(current_cycle_start) = changes.current_cycle_start {
            next.current_cycle_start = current_cycle_start;
        }
        if let Some(current_cycle_end) = changes.current_cycle_end {
            next.current_cycle_end = current_cycle_end;
        }
        if let Some(total_count) = changes.total_count {
            next.total_count = total_count;
        }
        if let Some(paid_count) = changes.paid_count {
            next.paid_count = paid_count;
        }
        if let Some(remaining_count) = changes.remaining_count {
            next.remaining_count = remaining_count;
        }
        if let Some(cancel_requested_at) = changes.cancel_requested_at {
            next.cancel_requested_at = cancel_requested_at;
        }
        if let Some(cancel_at_cycle_end) = changes.cancel_at_cycle_end {
            next.cancel_at_cycle_end = cancel_at_cycle_end;
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = user_subscriptions)]
pub struct InsertUserSubscriptionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub gateway_subscription_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_count: i32,
    pub paid_count: i32,
    pub remaining_count: i32,
}

/// Partial update of a subscription row. `None` leaves a column as is;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq, AsChangeset)]
#[diesel(table_name = user_subscriptions)]
pub struct UserSubscriptionChangeset {
    pub plan_id: Option<Uuid>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub start_date: Option<Option<DateTime<Utc>>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub current_cycle_start: Option<Option<DateTime<Utc>>>,
    pub current_cycle_end: Option<Option<DateTime<Utc>>>,
    pub total_count: Option<i32>,
    pub paid_count: Option<i32>,
    pub remaining_count: Option<i32>,
    pub cancel_requested_at: Option<Option<DateTime<Utc>>>,
    pub cancel_at_cycle_end: Option<bool>,
}

/// A live subscription joined with the catalog entry it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionWithPlan {
    pub subscription: UserSubscriptionEntity,
    pub plan: SubscriptionPlanEntity,
}
