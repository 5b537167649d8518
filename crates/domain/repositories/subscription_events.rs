use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscription_events::{
    InsertSubscriptionEventEntity, SubscriptionEventEntity,
};

#[automock]
#[async_trait]
pub trait SubscriptionEventRepository {
    async fn append(&self, event: InsertSubscriptionEventEntity) -> Result<Uuid>;

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionEventEntity>>;
}
