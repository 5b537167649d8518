use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain;
use crate::infra::db::postgres::{
    postgres_connection::PgPoolSquad, schema::subscription_plans,
};
use domain::{entities::plans::SubscriptionPlanEntity, repositories::plans::PlanRepository};

pub struct PlanPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PlanPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PlanRepository for PlanPostgres {
    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let plans = subscription_plans::table
            .filter(subscription_plans::is_active.eq(true))
            .order((
                subscription_plans::category.asc(),
                subscription_plans::billing_cycle_months.asc(),
            ))
            .select(SubscriptionPlanEntity::as_select())
            .load::<SubscriptionPlanEntity>(&mut conn)?;

        Ok(plans)
    }

    async fn find_active_plan_by_id(
        &self,
        plan_id: Uuid,
    ) -> Result<Option<SubscriptionPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let plan = subscription_plans::table
            .filter(subscription_plans::id.eq(plan_id))
            .filter(subscription_plans::is_active.eq(true))
            .select(SubscriptionPlanEntity::as_select())
            .first::<SubscriptionPlanEntity>(&mut conn)
            .optional()?;

        Ok(plan)
    }

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let plan = subscription_plans::table
            .filter(subscription_plans::id.eq(plan_id))
            .select(SubscriptionPlanEntity::as_select())
            .first::<SubscriptionPlanEntity>(&mut conn)
            .optional()?;

        Ok(plan)
    }

    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> Result<Option<SubscriptionPlanEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let plan = subscription_plans::table
            .filter(subscription_plans::gateway_plan_id.eq(gateway_plan_id))
            .select(SubscriptionPlanEntity::as_select())
            .first::<SubscriptionPlanEntity>(&mut conn)
            .optional()?;

        Ok(plan)
    }
}
