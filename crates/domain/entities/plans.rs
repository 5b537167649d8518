use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::value_objects::{enums::service_categories::ServiceCategory, plan_change},
    infra::db::postgres::schema::subscription_plans,
};

/// Catalog entry. Plans are seeded by migrations and never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Identifiable, Selectable, Queryable)]
#[diesel(table_name = subscription_plans)]
pub struct SubscriptionPlanEntity {
    pub id: Uuid,
    pub name: String,
    pub category: String,
    pub price_minor: i32,
    pub billing_cycle_months: i32,
    pub gateway_plan_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPlanEntity {
    pub fn category(&self) -> Result<ServiceCategory> {
        self.category.parse()
    }

    /// Billing cycles this plan runs for over the fixed horizon.
    pub fn total_count(&self) -> Result<i32> {
        plan_change::total_count_for_cycle(self.billing_cycle_months)
    }
}
