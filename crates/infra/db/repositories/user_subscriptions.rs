use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{subscription_events, subscription_plans, user_subscriptions},
    },
};
use domain::{
    entities::{
        plans::SubscriptionPlanEntity,
        subscription_events::InsertSubscriptionEventEntity,
        user_subscriptions::{
            InsertUserSubscriptionEntity, SubscriptionWithPlan, UserSubscriptionChangeset,
            UserSubscriptionEntity,
        },
    },
    repositories::user_subscriptions::UserSubscriptionRepository,
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

pub struct UserSubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserSubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserSubscriptionRepository for UserSubscriptionPostgres {
    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<UserSubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = user_subscriptions::table
            .filter(user_subscriptions::id.eq(subscription_id))
            .select(UserSubscriptionEntity::as_select())
            .first::<UserSubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = user_subscriptions::table
            .filter(user_subscriptions::gateway_subscription_id.eq(gateway_subscription_id))
            .select(UserSubscriptionEntity::as_select())
            .first::<UserSubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn list_non_terminal_with_plans(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SubscriptionWithPlan>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let statuses: Vec<&str> = SubscriptionStatus::NON_TERMINAL
            .iter()
            .map(|status| status.as_str())
            .collect();

        let rows = user_subscriptions::table
            .inner_join(subscription_plans::table)
            .filter(user_subscriptions::user_id.eq(user_id))
            .filter(user_subscriptions::status.eq_any(statuses))
            .order(user_subscriptions::created_at.asc())
            .select((
                UserSubscriptionEntity::as_select(),
                SubscriptionPlanEntity::as_select(),
            ))
            .load::<(UserSubscriptionEntity, SubscriptionPlanEntity)>(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|(subscription, plan)| SubscriptionWithPlan { subscription, plan })
            .collect())
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<UserSubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let mut query = user_subscriptions::table
            .filter(user_subscriptions::status.eq(SubscriptionStatus::Created.as_str()))
            .filter(user_subscriptions::created_at.lt(cutoff))
            .order(user_subscriptions::created_at.asc())
            .select(UserSubscriptionEntity::as_select())
            .into_boxed();

        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let subscriptions = query.load::<UserSubscriptionEntity>(&mut conn)?;

        Ok(subscriptions)
    }

    async fn insert_with_event(
        &self,
        subscription: InsertUserSubscriptionEntity,
        event: InsertSubscriptionEventEntity,
    ) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let id = conn.transaction::<Uuid, anyhow::Error, _>(|tx| {
            let id = insert_into(user_subscriptions::table)
                .values(&subscription)
                .returning(user_subscriptions::id)
                .get_result::<Uuid>(tx)?;

            insert_into(subscription_events::table)
                .values(&event)
                .execute(tx)?;

            Ok(id)
        })?;

        Ok(id)
    }

    async fn update_with_event(
        &self,
        subscription_id: Uuid,
        expected_version: i32,
        changes: UserSubscriptionChangeset,
        event: InsertSubscriptionEventEntity,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let applied = conn.transaction::<bool, anyhow::Error, _>(|tx| {
            let updated = update(user_subscriptions::table)
                .filter(user_subscriptions::id.eq(subscription_id))
                .filter(user_subscriptions::version.eq(expected_version))
                .set((
                    &changes,
                    user_subscriptions::version.eq(user_subscriptions::version + 1),
                    user_subscriptions::updated_at.eq(Utc::now()),
                ))
                .execute(tx)?;

            if updated == 0 {
                return Ok(false);
            }

            insert_into(subscription_events::table)
                .values(&event)
                .execute(tx)?;

            Ok(true)
        })?;

        Ok(applied)
    }
}
