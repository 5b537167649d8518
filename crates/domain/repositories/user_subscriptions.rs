use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::{
    subscription_events::InsertSubscriptionEventEntity,
    user_subscriptions::{
        InsertUserSubscriptionEntity, SubscriptionWithPlan, UserSubscriptionChangeset,
        UserSubscriptionEntity,
    },
};

#[automock]
#[async_trait]
pub trait UserSubscriptionRepository {
    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<UserSubscriptionEntity>>;

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscriptionEntity>>;

    /// Subscriptions of `user_id` in a non-terminal status, joined with their plan.
    async fn list_non_terminal_with_plans(&self, user_id: Uuid)
    -> Result<Vec<SubscriptionWithPlan>>;

    /// CREATED subscriptions whose row was inserted before `cutoff`, oldest first.
    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<UserSubscriptionEntity>>;

    /// Inserts the row and its creation event in one transaction.
    async fn insert_with_event(
        &self,
        subscription: InsertUserSubscriptionEntity,
        event: InsertSubscriptionEventEntity,
    ) -> Result<Uuid>;

    /// Applies `changes` only if the row is still at `expected_version`, bumping
    /// the version and appending `event` in the same transaction.
    ///
    /// Returns `false` (and writes nothing) when another writer got there first.
    async fn update_with_event(
        &self,
        subscription_id: Uuid,
        expected_version: i32,
        changes: UserSubscriptionChangeset,
        event: InsertSubscriptionEventEntity,
    ) -> Result<bool>;
}
