//! In-memory doubles for multi-step scenarios that plain mocks describe poorly.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use billing::domain::{
    entities::{
        plans::SubscriptionPlanEntity,
        subscription_events::{InsertSubscriptionEventEntity, SubscriptionEventEntity},
        user_subscriptions::{
            InsertUserSubscriptionEntity, SubscriptionWithPlan, UserSubscriptionChangeset,
            UserSubscriptionEntity,
        },
    },
    repositories::{
        payment_gateway::{GatewaySubscription, PaymentGateway},
        plans::PlanRepository,
        subscription_events::SubscriptionEventRepository,
        user_subscriptions::UserSubscriptionRepository,
    },
    value_objects::enums::{
        payment_statuses::PaymentStatus, service_categories::ServiceCategory,
        subscription_statuses::SubscriptionStatus,
    },
};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::auth::AuthUser;

pub fn auth_user(user_id: Uuid) -> AuthUser {
    AuthUser {
        user_id,
        email: Some("member@example.com".to_string()),
        role: "authenticated".to_string(),
    }
}

pub fn admin_user() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        email: None,
        role: crate::auth::ADMIN_ROLE.to_string(),
    }
}

pub fn plan(category: ServiceCategory, billing_cycle_months: i32) -> SubscriptionPlanEntity {
    SubscriptionPlanEntity {
        id: Uuid::new_v4(),
        name: format!("{category} {billing_cycle_months}m"),
        category: category.to_string(),
        price_minor: 499_00 * billing_cycle_months,
        billing_cycle_months,
        gateway_plan_id: format!("plan_{}", Uuid::new_v4().simple()),
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn subscription_row(
    user_id: Uuid,
    plan: &SubscriptionPlanEntity,
    status: SubscriptionStatus,
) -> UserSubscriptionEntity {
    let now = Utc::now();
    let total_count = plan.total_count().unwrap_or(1);
    UserSubscriptionEntity {
        id: Uuid::new_v4(),
        user_id,
        plan_id: plan.id,
        status: status.to_string(),
        payment_status: PaymentStatus::Paid.to_string(),
        gateway_subscription_id: Some(format!("sub_{}", Uuid::new_v4().simple())),
        start_date: Some(now - Duration::days(40)),
        end_date: None,
        current_cycle_start: Some(now - Duration::days(10)),
        current_cycle_end: Some(now + Duration::days(80)),
        total_count,
        paid_count: 1,
        remaining_count: total_count - 1,
        cancel_requested_at: None,
        cancel_at_cycle_end: false,
        version: 1,
        created_at: now - Duration::days(40),
        updated_at: now,
    }
}

/// Plans, subscriptions and events behind one lock each, with the same
/// version semantics as the Postgres repository.
#[derive(Default)]
pub struct InMemoryStore {
    plans: Mutex<Vec<SubscriptionPlanEntity>>,
    subscriptions: Mutex<Vec<UserSubscriptionEntity>>,
    events: Mutex<Vec<SubscriptionEventEntity>>,
    fail_inserts: AtomicBool,
    /// Number of upcoming `update_with_event` calls that lose the version race.
    forced_conflicts: AtomicUsize,
    update_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn add_plan(&self, plan: SubscriptionPlanEntity) {
        self.plans.lock().unwrap().push(plan);
    }

    pub fn add_subscription(&self, subscription: UserSubscriptionEntity) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn subscription(&self, subscription_id: Uuid) -> UserSubscriptionEntity {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == subscription_id)
            .cloned()
            .expect("subscription present")
    }

    pub fn subscriptions(&self) -> Vec<UserSubscriptionEntity> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SubscriptionEventEntity> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.event_type)
            .collect()
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn force_conflicts(&self, count: usize) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn push_event(&self, event: InsertSubscriptionEventEntity) -> Uuid {
        let id = Uuid::new_v4();
        self.events.lock().unwrap().push(SubscriptionEventEntity {
            id,
            event_type: event.event_type,
            user_id: event.user_id,
            subscription_id: event.subscription_id,
            plan_id: event.plan_id,
            metadata: event.metadata,
            created_at: Utc::now(),
        });
        id
    }
}

#[async_trait]
impl PlanRepository for InMemoryStore {
    async fn list_active_plans(&self) -> Result<Vec<SubscriptionPlanEntity>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .filter(|plan| plan.is_active)
            .cloned()
            .collect())
    }

    async fn find_active_plan_by_id(
        &self,
        plan_id: Uuid,
    ) -> Result<Option<SubscriptionPlanEntity>> {
        Ok(PlanRepository::find_by_id(self, plan_id).await?.filter(|plan| plan.is_active))
    }

    async fn find_by_id(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlanEntity>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|plan| plan.id == plan_id)
            .cloned())
    }

    async fn find_by_gateway_plan_id(
        &self,
        gateway_plan_id: &str,
    ) -> Result<Option<SubscriptionPlanEntity>> {
        Ok(self
            .plans
            .lock()
            .unwrap()
            .iter()
            .find(|plan| plan.gateway_plan_id == gateway_plan_id)
            .cloned())
    }
}

#[async_trait]
impl SubscriptionEventRepository for InMemoryStore {
    async fn append(&self, event: InsertSubscriptionEventEntity) -> Result<Uuid> {
        Ok(self.push_event(event))
    }

    async fn list_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<SubscriptionEventEntity>> {
        Ok(self
            .events()
            .into_iter()
            .filter(|event| event.subscription_id == Some(subscription_id))
            .collect())
    }
}

#[async_trait]
impl UserSubscriptionRepository for InMemoryStore {
    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<UserSubscriptionEntity>> {
        Ok(self
            .subscriptions()
            .into_iter()
            .find(|row| row.id == subscription_id))
    }

    async fn find_by_gateway_subscription_id(
        &self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscriptionEntity>> {
        Ok(self
            .subscriptions()
            .into_iter()
            .find(|row| row.gateway_subscription_id.as_deref() == Some(gateway_subscription_id)))
    }

    async fn list_non_terminal_with_plans(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<SubscriptionWithPlan>> {
        let plans: HashMap<Uuid, SubscriptionPlanEntity> = self
            .plans
            .lock()
            .unwrap()
            .iter()
            .map(|plan| (plan.id, plan.clone()))
            .collect();

        let mut rows = Vec::new();
        for subscription in self.subscriptions() {
            if subscription.user_id != user_id || !subscription.status()?.is_non_terminal() {
                continue;
            }
            let plan = plans
                .get(&subscription.plan_id)
                .cloned()
                .ok_or_else(|| anyhow!("dangling plan reference"))?;
            rows.push(SubscriptionWithPlan { subscription, plan });
        }
        Ok(rows)
    }

    async fn list_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<i64>,
    ) -> Result<Vec<UserSubscriptionEntity>> {
        let mut rows: Vec<_> = self
            .subscriptions()
            .into_iter()
            .filter(|row| row.status == SubscriptionStatus::Created.as_str())
            .filter(|row| row.created_at < cutoff)
            .collect();
        rows.sort_by_key(|row| row.created_at);
        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn insert_with_event(
        &self,
        subscription: InsertUserSubscriptionEntity,
        event: InsertSubscriptionEventEntity,
    ) -> Result<Uuid> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }
        let now = Utc::now();
        self.add_subscription(UserSubscriptionEntity {
            id: subscription.id,
            user_id: subscription.user_id,
            plan_id: subscription.plan_id,
            status: subscription.status,
            payment_status: subscription.payment_status,
            gateway_subscription_id: subscription.gateway_subscription_id,
            start_date: subscription.start_date,
            end_date: subscription.end_date,
            current_cycle_start: None,
            current_cycle_end: None,
            total_count: subscription.total_count,
            paid_count: subscription.paid_count,
            remaining_count: subscription.remaining_count,
            cancel_requested_at: None,
            cancel_at_cycle_end: false,
            version: 1,
            created_at: now,
            updated_at: now,
        });
        self.push_event(event);
        Ok(subscription.id)
    }

    async fn update_with_event(
        &self,
        subscription_id: Uuid,
        expected_version: i32,
        changes: UserSubscriptionChangeset,
        event: InsertSubscriptionEventEntity,
    ) -> Result<bool> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let Some(row) = subscriptions.iter_mut().find(|row| row.id == subscription_id) else {
            return Ok(false);
        };

        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if forced {
            // Simulates a concurrent writer that committed in between.
            row.version += 1;
            return Ok(false);
        }
        if row.version != expected_version {
            return Ok(false);
        }

        *row = row.with_changes(&changes);
        row.version += 1;
        row.updated_at = Utc::now();
        drop(subscriptions);
        self.push_event(event);
        Ok(true)
    }
}

/// Gateway double that hands out sequential ids and records every call.
#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_cancel: AtomicBool,
    fail_update: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeGateway {
    pub fn fail_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_cancel(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub fn fail_update(&self) {
        self.fail_update.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_subscription(
        &self,
        gateway_plan_id: &str,
        total_count: i32,
        _notes: HashMap<String, String>,
    ) -> Result<GatewaySubscription> {
        self.record(format!("create {gateway_plan_id} {total_count}"));
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("gateway timeout");
        }
        let id = format!("sub_fake_{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(GatewaySubscription {
            short_url: Some(format!("https://rzp.io/i/{id}")),
            status: Some("created".to_string()),
            current_end: None,
            id,
        })
    }

    async fn cancel_subscription(
        &self,
        gateway_subscription_id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<GatewaySubscription> {
        self.record(format!("cancel {gateway_subscription_id} {cancel_at_cycle_end}"));
        if self.fail_cancel.load(Ordering::SeqCst) {
            bail!("gateway returned 503");
        }
        Ok(GatewaySubscription {
            id: gateway_subscription_id.to_string(),
            status: Some(if cancel_at_cycle_end { "active" } else { "cancelled" }.to_string()),
            short_url: None,
            current_end: None,
        })
    }

    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        gateway_plan_id: &str,
        remaining_count: i32,
    ) -> Result<GatewaySubscription> {
        self.record(format!(
            "update {gateway_subscription_id} {gateway_plan_id} {remaining_count}"
        ));
        if self.fail_update.load(Ordering::SeqCst) {
            bail!("gateway rejected plan update");
        }
        Ok(GatewaySubscription {
            id: gateway_subscription_id.to_string(),
            status: Some("active".to_string()),
            short_url: None,
            current_end: None,
        })
    }

    fn verify_webhook_signature(&self, _payload: &[u8], signature: &str) -> Result<()> {
        if signature == "valid" {
            Ok(())
        } else {
            bail!("webhook signature mismatch")
        }
    }
}
