use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain;
use crate::infra::db::postgres::{
    postgres_connection::PgPoolSquad, schema::subscription_events,
};
use domain::{
    entities::subscription_events::{InsertSubscriptionEventEntity, SubscriptionEventEntity},
    repositories::subscription_events::SubscriptionEventRepository,
};

pub struct SubscriptionEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionEventRepository for SubscriptionEventPostgres {
    async fn append(&self, event: InsertSubscriptionEventEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let id = insert_into(subscription_events::table)
            .values(&event)
            .returning(subscription_events::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(id)
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionEventEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let events = subscription_events::table
            .filter(subscription_events::subscription_id.eq(subscription_id))
            .order(subscription_events::created_at.asc())
            .select(SubscriptionEventEntity::as_select())
            .load::<SubscriptionEventEntity>(&mut conn)?;

        Ok(events)
    }
}
