use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::plans::SubscriptionPlanEntity;

#[automock]
#[async_trait]
pub trait PlanRepository {
    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlanEntity>>;

    async fn find_active_plan_by_id(&self, plan_id: Uuid)
    -> Result<Option<SubscriptionPlanEntity>>;

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlanEntity>>;

    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> Result<Option<SubscriptionPlanEntity>>;
}
