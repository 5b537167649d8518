use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use billing::domain::{
    entities::{
        subscription_events::{InsertSubscriptionEventEntity, event_types},
        user_subscriptions::{
            InsertUserSubscriptionEntity, UserSubscriptionChangeset, UserSubscriptionEntity,
        },
    },
    repositories::{
        payment_gateway::PaymentGateway, plans::PlanRepository,
        subscription_events::SubscriptionEventRepository,
        user_subscriptions::UserSubscriptionRepository,
    },
    value_objects::{
        enums::{payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus},
        plan_change::recount_for_plan_change,
        subscription_state::ButtonState,
        subscriptions::{
            CancelSubscriptionRequest, CancelSubscriptionResponse, ChangePlanRequest,
            ChangePlanResponse, CreateSubscriptionRequest, CreateSubscriptionResponse,
            PaymentStatusResetResponse, PlanDto, SubscriptionEventDto, SubscriptionIdRequest,
        },
    },
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{auth::AuthUser, usecases::subscription_state::load_overview};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("{0}")]
    Validation(String),
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("plan not found")]
    PlanNotFound,
    #[error("subscription does not belong to the current user")]
    Forbidden,
    #[error("{0}")]
    Conflict(String),
    #[error("payment gateway request failed")]
    Gateway(#[source] anyhow::Error),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::Validation(_) => StatusCode::BAD_REQUEST,
            SubscriptionError::SubscriptionNotFound | SubscriptionError::PlanNotFound => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::Forbidden => StatusCode::FORBIDDEN,
            SubscriptionError::Conflict(_) => StatusCode::CONFLICT,
            SubscriptionError::Gateway(_) => StatusCode::BAD_GATEWAY,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

/// Who asked for an immediate cancellation. Recorded in the event metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    UserRequested,
    AdminRequested,
    PaymentFailed,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::UserRequested => "user_requested",
            CancelReason::AdminRequested => "admin_requested",
            CancelReason::PaymentFailed => "payment_failed",
        }
    }
}

fn concurrent_update() -> SubscriptionError {
    SubscriptionError::Conflict("subscription was modified concurrently, please retry".to_string())
}

pub struct SubscriptionUseCase<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    plan_repo: Arc<P>,
    subscription_repo: Arc<S>,
    event_repo: Arc<E>,
    gateway: Arc<G>,
}

impl<P, S, E, G> SubscriptionUseCase<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(plan_repo: Arc<P>, subscription_repo: Arc<S>, event_repo: Arc<E>, gateway: Arc<G>) -> Self {
        Self {
            plan_repo,
            subscription_repo,
            event_repo,
            gateway,
        }
    }

    pub async fn list_plans(&self) -> UseCaseResult<Vec<PlanDto>> {
        info!("subscriptions: listing active plans");
        let plans = self.plan_repo.list_active_plans().await.map_err(|err| {
            error!(db_error = ?err, "subscriptions: failed to list active plans");
            SubscriptionError::Internal(err)
        })?;
        let plan_count = plans.len();
        info!(plan_count, "subscriptions: active plans loaded");

        plans
            .into_iter()
            .map(PlanDto::try_from)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(SubscriptionError::Internal)
    }

    pub async fn create_subscription(
        &self,
        auth: &AuthUser,
        request: CreateSubscriptionRequest,
    ) -> UseCaseResult<CreateSubscriptionResponse> {
        let user_id = auth.user_id;
        let command = request
            .validate()
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;
        let plan_id = command.plan_id;

        info!(%user_id, %plan_id, "subscriptions: create requested");

        let plan = self
            .plan_repo
            .find_active_plan_by_id(plan_id)
            .await
            .map_err(|err| {
                error!(%user_id, %plan_id, db_error = ?err, "subscriptions: failed to load plan");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::PlanNotFound)?;
        let category = plan.category()?;
        let total_count = plan.total_count()?;

        let overview = load_overview(self.subscription_repo.as_ref(), user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load current subscriptions");
                SubscriptionError::Internal(err)
            })?;

        match overview.button_state(category, &plan.name) {
            ButtonState::Subscribe { .. } => {}
            ButtonState::ChangePlan { current_plan } => {
                warn!(%user_id, %category, %current_plan, "subscriptions: category already subscribed");
                return Err(SubscriptionError::Conflict(format!(
                    "already has an active {category} plan ({current_plan}); change plan instead"
                )));
            }
            ButtonState::Disabled { ends_on } => {
                let ends = ends_on
                    .map(|date| date.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "soon".to_string());
                warn!(%user_id, %category, %ends, "subscriptions: category blocked by scheduled cancellation");
                return Err(SubscriptionError::Conflict(format!(
                    "current {category} subscription is cancelled and ends {ends}"
                )));
            }
        }

        let subscription_id = Uuid::new_v4();
        let notes = HashMap::from([
            ("user_id".to_string(), user_id.to_string()),
            ("plan_id".to_string(), plan.id.to_string()),
            ("subscription_id".to_string(), subscription_id.to_string()),
            ("category".to_string(), category.to_string()),
        ]);

        let gateway_subscription = self
            .gateway
            .create_subscription(&plan.gateway_plan_id, total_count, notes)
            .await
            .map_err(|err| {
                error!(%user_id, %plan_id, gateway_error = ?err, "subscriptions: gateway create failed");
                SubscriptionError::Gateway(err)
            })?;
        let gateway_subscription_id = gateway_subscription.id.clone();

        let insert = InsertUserSubscriptionEntity {
            id: subscription_id,
            user_id,
            plan_id: plan.id,
            status: SubscriptionStatus::Created.to_string(),
            payment_status: PaymentStatus::Pending.to_string(),
            gateway_subscription_id: Some(gateway_subscription_id.clone()),
            start_date: None,
            end_date: None,
            total_count,
            paid_count: 0,
            remaining_count: total_count,
        };
        let event = InsertSubscriptionEventEntity::for_subscription(
            event_types::SUBSCRIPTION_CREATED,
            user_id,
            subscription_id,
            plan.id,
            json!({
                "gateway_subscription_id": gateway_subscription_id,
                "category": category,
                "total_count": total_count,
            }),
        );

        if let Err(err) = self.subscription_repo.insert_with_event(insert, event).await {
            error!(
                %user_id,
                %subscription_id,
                %gateway_subscription_id,
                db_error = ?err,
                "subscriptions: failed to persist created subscription"
            );
            match self
                .gateway
                .cancel_subscription(&gateway_subscription_id, false)
                .await
            {
                Ok(_) => info!(
                    %gateway_subscription_id,
                    "subscriptions: orphaned gateway subscription cancelled"
                ),
                Err(cancel_err) => error!(
                    %gateway_subscription_id,
                    gateway_error = ?cancel_err,
                    "subscriptions: orphaned gateway subscription left for cleanup"
                ),
            }
            return Err(SubscriptionError::Internal(err));
        }

        info!(
            %user_id,
            %subscription_id,
            %gateway_subscription_id,
            "subscriptions: subscription created"
        );

        Ok(CreateSubscriptionResponse {
            subscription_id,
            gateway_subscription_id,
            checkout_url: gateway_subscription.short_url,
        })
    }

    pub async fn cancel_subscription(
        &self,
        auth: &AuthUser,
        request: CancelSubscriptionRequest,
    ) -> UseCaseResult<CancelSubscriptionResponse> {
        let command = request
            .validate()
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;
        let subscription = self
            .load_subscription(auth, command.subscription_id, true)
            .await?;

        if command.at_cycle_end {
            return self.cancel_at_cycle_end(auth, subscription).await;
        }

        let status = subscription.status()?;
        if status.is_terminal() {
            return Err(SubscriptionError::Conflict(format!(
                "subscription is already {status}"
            )));
        }

        let reason = if subscription.user_id == auth.user_id {
            CancelReason::UserRequested
        } else {
            CancelReason::AdminRequested
        };
        self.cancel_immediately(&subscription, reason).await
    }

    /// Cancels at the gateway and locally right away.
    ///
    /// A failed gateway call is logged and recorded in the event metadata but
    /// does not stop the local row from becoming CANCELLED.
    pub async fn cancel_immediately(
        &self,
        subscription: &UserSubscriptionEntity,
        reason: CancelReason,
    ) -> UseCaseResult<CancelSubscriptionResponse> {
        let subscription_id = subscription.id;
        let user_id = subscription.user_id;

        let gateway_error = match subscription.gateway_subscription_id.as_deref() {
            Some(gateway_subscription_id) => match self
                .gateway
                .cancel_subscription(gateway_subscription_id, false)
                .await
            {
                Ok(_) => None,
                Err(err) => {
                    error!(
                        %subscription_id,
                        gateway_subscription_id,
                        gateway_error = ?err,
                        "subscriptions: gateway cancel failed; cancelling locally anyway"
                    );
                    Some(err.to_string())
                }
            },
            None => {
                warn!(
                    %subscription_id,
                    "subscriptions: no gateway reference to cancel; cancelling locally only"
                );
                Some("subscription has no gateway reference".to_string())
            }
        };

        let now = Utc::now();
        let changes = UserSubscriptionChangeset {
            status: Some(SubscriptionStatus::Cancelled.to_string()),
            payment_status: Some(PaymentStatus::Failed.to_string()),
            end_date: Some(Some(now)),
            cancel_requested_at: Some(None),
            cancel_at_cycle_end: Some(false),
            ..Default::default()
        };
        let event = InsertSubscriptionEventEntity::for_subscription(
            event_types::SUBSCRIPTION_CANCELLED,
            user_id,
            subscription_id,
            subscription.plan_id,
            json!({
                "reason": reason.as_str(),
                "previous_status": subscription.status,
                "gateway_cancelled": gateway_error.is_none(),
                "gateway_error": gateway_error,
            }),
        );

        let applied = self
            .subscription_repo
            .update_with_event(subscription_id, subscription.version, changes, event)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to persist cancellation");
                SubscriptionError::Internal(err)
            })?;
        if !applied {
            warn!(%subscription_id, "subscriptions: cancellation lost a version race");
            return Err(concurrent_update());
        }

        info!(
            %user_id,
            %subscription_id,
            reason = reason.as_str(),
            "subscriptions: subscription cancelled"
        );

        Ok(CancelSubscriptionResponse {
            subscription_id,
            status: SubscriptionStatus::Cancelled.to_string(),
            cancel_at_cycle_end: false,
            end_date: Some(now),
        })
    }

    async fn cancel_at_cycle_end(
        &self,
        auth: &AuthUser,
        subscription: UserSubscriptionEntity,
    ) -> UseCaseResult<CancelSubscriptionResponse> {
        let subscription_id = subscription.id;

        if subscription.status()? != SubscriptionStatus::Active {
            return Err(SubscriptionError::Conflict(
                "only active subscriptions can be cancelled at cycle end".to_string(),
            ));
        }
        if subscription.cancel_at_cycle_end || subscription.cancel_requested_at.is_some() {
            return Err(SubscriptionError::Conflict(
                "cancellation has already been requested".to_string(),
            ));
        }
        let cycle_end = subscription
            .current_cycle_end
            .or(subscription.end_date)
            .ok_or_else(|| {
                SubscriptionError::Conflict("current billing cycle end is unknown".to_string())
            })?;
        let gateway_subscription_id = subscription
            .gateway_subscription_id
            .as_deref()
            .ok_or_else(|| {
                error!(%subscription_id, "subscriptions: active subscription has no gateway id");
                anyhow!("active subscription {subscription_id} has no gateway id")
            })?;

        self.gateway
            .cancel_subscription(gateway_subscription_id, true)
            .await
            .map_err(|err| {
                error!(
                    %subscription_id,
                    gateway_subscription_id,
                    gateway_error = ?err,
                    "subscriptions: gateway cancel at cycle end failed"
                );
                SubscriptionError::Gateway(err)
            })?;

        let now = Utc::now();
        let changes = UserSubscriptionChangeset {
            end_date: Some(Some(cycle_end)),
            cancel_requested_at: Some(Some(now)),
            cancel_at_cycle_end: Some(true),
            ..Default::default()
        };
        let event = InsertSubscriptionEventEntity::for_subscription(
            event_types::CANCEL_REQUESTED,
            subscription.user_id,
            subscription_id,
            subscription.plan_id,
            json!({
                "requested_by": auth.user_id,
                "cycle_end": cycle_end,
            }),
        );

        let applied = self
            .subscription_repo
            .update_with_event(subscription_id, subscription.version, changes, event)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to persist cancel request");
                SubscriptionError::Internal(err)
            })?;
        if !applied {
            warn!(%subscription_id, "subscriptions: cancel request lost a version race");
            return Err(concurrent_update());
        }

        info!(%subscription_id, %cycle_end, "subscriptions: cancellation scheduled");

        Ok(CancelSubscriptionResponse {
            subscription_id,
            status: SubscriptionStatus::Active.to_string(),
            cancel_at_cycle_end: true,
            end_date: Some(cycle_end),
        })
    }

    pub async fn change_plan(
        &self,
        auth: &AuthUser,
        request: ChangePlanRequest,
    ) -> UseCaseResult<ChangePlanResponse> {
        let command = request
            .validate()
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;
        let subscription = self
            .load_subscription(auth, command.subscription_id, false)
            .await?;
        let subscription_id = subscription.id;

        if subscription.status()? != SubscriptionStatus::Active {
            return Err(SubscriptionError::Conflict(
                "only active subscriptions can change plan".to_string(),
            ));
        }
        if subscription.is_cancellation_scheduled() {
            return Err(SubscriptionError::Conflict(
                "subscription is scheduled for cancellation".to_string(),
            ));
        }

        let current_plan_id = subscription.plan_id;
        let current_plan = self
            .plan_repo
            .find_by_id(current_plan_id)
            .await
            .map_err(|err| {
                error!(
                    %subscription_id,
                    plan_id = %current_plan_id,
                    db_error = ?err,
                    "subscriptions: failed to load current plan for plan change"
                );
                SubscriptionError::Internal(err)
            })?
            .ok_or_else(|| {
                error!(
                    %subscription_id,
                    plan_id = %current_plan_id,
                    "subscriptions: subscription references a missing plan"
                );
                anyhow!("subscription {subscription_id} references a missing plan")
            })?;
        let new_plan_id = command.new_plan_id;
        let new_plan = self
            .plan_repo
            .find_active_plan_by_id(new_plan_id)
            .await
            .map_err(|err| {
                error!(
                    %subscription_id,
                    %new_plan_id,
                    db_error = ?err,
                    "subscriptions: failed to load target plan for plan change"
                );
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::PlanNotFound)?;

        if new_plan.id == current_plan.id {
            return Err(SubscriptionError::Conflict(
                "subscription is already on this plan".to_string(),
            ));
        }
        if new_plan.category()? != current_plan.category()? {
            return Err(SubscriptionError::Validation(
                "new plan must belong to the same category".to_string(),
            ));
        }

        let recount = recount_for_plan_change(new_plan.billing_cycle_months, subscription.paid_count)
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;

        let gateway_subscription_id = subscription
            .gateway_subscription_id
            .as_deref()
            .ok_or_else(|| {
                error!(%subscription_id, "subscriptions: active subscription has no gateway id");
                anyhow!("active subscription {subscription_id} has no gateway id")
            })?;
        self.gateway
            .update_subscription(
                gateway_subscription_id,
                &new_plan.gateway_plan_id,
                recount.remaining_count,
            )
            .await
            .map_err(|err| {
                error!(
                    %subscription_id,
                    gateway_subscription_id,
                    gateway_error = ?err,
                    "subscriptions: gateway plan update failed"
                );
                SubscriptionError::Gateway(err)
            })?;

        let changes = UserSubscriptionChangeset {
            plan_id: Some(new_plan.id),
            total_count: Some(recount.total_count),
            remaining_count: Some(recount.remaining_count),
            ..Default::default()
        };
        let event = InsertSubscriptionEventEntity::for_subscription(
            event_types::PLAN_CHANGED,
            subscription.user_id,
            subscription_id,
            new_plan.id,
            json!({
                "from_plan_id": current_plan.id,
                "to_plan_id": new_plan.id,
                "paid_count": subscription.paid_count,
                "previous_total_count": subscription.total_count,
                "total_count": recount.total_count,
                "remaining_count": recount.remaining_count,
            }),
        );

        let applied = self
            .subscription_repo
            .update_with_event(subscription_id, subscription.version, changes, event)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to persist plan change");
                SubscriptionError::Internal(err)
            })?;
        if !applied {
            warn!(%subscription_id, "subscriptions: plan change lost a version race");
            return Err(concurrent_update());
        }

        info!(
            %subscription_id,
            from_plan_id = %current_plan.id,
            to_plan_id = %new_plan.id,
            remaining_count = recount.remaining_count,
            "subscriptions: plan changed"
        );

        Ok(ChangePlanResponse {
            subscription_id,
            plan_id: new_plan.id,
            total_count: recount.total_count,
            remaining_count: recount.remaining_count,
        })
    }

    /// Flips a FAILED payment back to PENDING so the user can retry checkout.
    pub async fn reset_payment_status(
        &self,
        auth: &AuthUser,
        request: SubscriptionIdRequest,
    ) -> UseCaseResult<PaymentStatusResetResponse> {
        let subscription_id = request
            .validate()
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;
        let subscription = self.load_subscription(auth, subscription_id, false).await?;

        if subscription.status()?.is_terminal() {
            return Err(SubscriptionError::Conflict(format!(
                "subscription is already {}",
                subscription.status
            )));
        }
        if subscription.payment_status()? != PaymentStatus::Failed {
            return Err(SubscriptionError::Conflict(
                "payment status can only be reset after a failed payment".to_string(),
            ));
        }

        let changes = UserSubscriptionChangeset {
            payment_status: Some(PaymentStatus::Pending.to_string()),
            ..Default::default()
        };
        let event = InsertSubscriptionEventEntity::for_subscription(
            event_types::PAYMENT_STATUS_RESET,
            subscription.user_id,
            subscription_id,
            subscription.plan_id,
            json!({ "previous_payment_status": subscription.payment_status }),
        );

        let applied = self
            .subscription_repo
            .update_with_event(subscription_id, subscription.version, changes, event)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to reset payment status");
                SubscriptionError::Internal(err)
            })?;
        if !applied {
            return Err(concurrent_update());
        }

        info!(%subscription_id, "subscriptions: payment status reset to pending");

        Ok(PaymentStatusResetResponse {
            subscription_id,
            payment_status: PaymentStatus::Pending.to_string(),
        })
    }

    pub async fn list_events(
        &self,
        auth: &AuthUser,
        subscription_id: Uuid,
    ) -> UseCaseResult<Vec<SubscriptionEventDto>> {
        self.load_subscription(auth, subscription_id, true).await?;

        let events = self
            .event_repo
            .list_for_subscription(subscription_id)
            .await
            .map_err(|err| {
                error!(%subscription_id, db_error = ?err, "subscriptions: failed to list events");
                SubscriptionError::Internal(err)
            })?;

        Ok(events.into_iter().map(SubscriptionEventDto::from).collect())
    }

    async fn load_subscription(
        &self,
        auth: &AuthUser,
        subscription_id: Uuid,
        admin_allowed: bool,
    ) -> UseCaseResult<UserSubscriptionEntity> {
        let user_id = auth.user_id;
        let subscription = self
            .subscription_repo
            .find_by_id(subscription_id)
            .await
            .map_err(|err| {
                error!(%user_id, %subscription_id, db_error = ?err, "subscriptions: failed to load subscription");
                SubscriptionError::Internal(err)
            })?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        if subscription.user_id != user_id && !(admin_allowed && auth.is_admin()) {
            warn!(%user_id, %subscription_id, "subscriptions: access to foreign subscription denied");
            return Err(SubscriptionError::Forbidden);
        }

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::{
        FakeGateway, InMemoryStore, admin_user, auth_user, plan, subscription_row,
    };
    use billing::domain::{
        repositories::{
            payment_gateway::MockPaymentGateway, plans::MockPlanRepository,
            subscription_events::MockSubscriptionEventRepository,
            user_subscriptions::MockUserSubscriptionRepository,
        },
        value_objects::enums::service_categories::ServiceCategory,
    };

    type StoreUseCase = SubscriptionUseCase<InMemoryStore, InMemoryStore, InMemoryStore, FakeGateway>;

    fn usecase(store: &Arc<InMemoryStore>, gateway: &Arc<FakeGateway>) -> StoreUseCase {
        SubscriptionUseCase::new(
            Arc::clone(store),
            Arc::clone(store),
            Arc::clone(store),
            Arc::clone(gateway),
        )
    }

    fn create_request(plan_id: Uuid) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            plan_id: Some(plan_id.to_string()),
        }
    }

    #[tokio::test]
    async fn create_persists_created_row_with_full_cycle_count() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let user = auth_user(Uuid::new_v4());

        let response = usecase(&store, &gateway)
            .create_subscription(&user, create_request(fitness.id))
            .await
            .unwrap();

        let row = store.subscription(response.subscription_id);
        assert_eq!(row.status, "CREATED");
        assert_eq!(row.payment_status, "PENDING");
        assert_eq!(row.total_count, 120);
        assert_eq!(row.remaining_count, 120);
        assert_eq!(
            row.gateway_subscription_id.as_deref(),
            Some(response.gateway_subscription_id.as_str())
        );
        assert!(response.checkout_url.is_some());
        assert_eq!(store.event_types(), vec!["subscription_created"]);
    }

    #[tokio::test]
    async fn create_rejects_invalid_plan_id_before_any_call() {
        let plan_repo = MockPlanRepository::new();
        let subscription_repo = MockUserSubscriptionRepository::new();
        let event_repo = MockSubscriptionEventRepository::new();
        let gateway = MockPaymentGateway::new();

        let err = SubscriptionUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            Arc::new(event_repo),
            Arc::new(gateway),
        )
        .create_subscription(
            &auth_user(Uuid::new_v4()),
            CreateSubscriptionRequest {
                plan_id: Some("fitness-gold".to_string()),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SubscriptionError::Validation(_)));
        assert_eq!(err.to_string(), "plan_id must be a valid UUID");
    }

    #[tokio::test]
    async fn create_leaves_no_row_when_gateway_fails() {
        let fitness = plan(ServiceCategory::Fitness, 6);
        let plan_id = fitness.id;

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_active_plan_by_id()
            .withf(move |id| *id == plan_id)
            .returning(move |_| Ok(Some(fitness.clone())));
        let mut subscription_repo = MockUserSubscriptionRepository::new();
        subscription_repo
            .expect_list_non_terminal_with_plans()
            .returning(|_| Ok(Vec::new()));
        subscription_repo.expect_insert_with_event().times(0);
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_subscription()
            .withf(|_, total_count, _| *total_count == 60)
            .times(1)
            .returning(|_, _, _| Err(anyhow!("gateway timeout")));

        let err = SubscriptionUseCase::new(
            Arc::new(plan_repo),
            Arc::new(subscription_repo),
            Arc::new(MockSubscriptionEventRepository::new()),
            Arc::new(gateway),
        )
        .create_subscription(&auth_user(Uuid::new_v4()), create_request(plan_id))
        .await
        .unwrap_err();

        assert!(matches!(err, SubscriptionError::Gateway(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn create_cancels_gateway_subscription_when_persistence_fails() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        store.fail_inserts();

        let err = usecase(&store, &gateway)
            .create_subscription(&auth_user(Uuid::new_v4()), create_request(fitness.id))
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Internal(_)));
        assert!(store.subscriptions().is_empty());
        let calls = gateway.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("cancel sub_fake_0 false"));
    }

    #[tokio::test]
    async fn create_rejects_category_with_active_plan() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let quarterly = plan(ServiceCategory::Fitness, 3);
        let yearly = plan(ServiceCategory::Fitness, 12);
        store.add_plan(quarterly.clone());
        store.add_plan(yearly.clone());
        store.add_subscription(subscription_row(user_id, &quarterly, SubscriptionStatus::Active));

        let err = usecase(&store, &gateway)
            .create_subscription(&auth_user(user_id), create_request(yearly.id))
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Conflict(_)));
        assert!(err.to_string().contains("already has an active fitness plan"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn immediate_cancel_tolerates_gateway_failure() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_cancel();
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);

        let response = usecase(&store, &gateway)
            .cancel_subscription(
                &auth_user(user_id),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.status, "CANCELLED");
        let row = store.subscription(subscription_id);
        assert_eq!(row.status, "CANCELLED");
        assert_eq!(row.payment_status, "FAILED");
        assert!(!row.cancel_at_cycle_end);
        assert!(row.cancel_requested_at.is_none());
        assert_eq!(row.version, 2);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "subscription.cancelled");
        assert_eq!(events[0].metadata["gateway_cancelled"], false);
        assert_eq!(events[0].metadata["reason"], "user_requested");
        assert!(events[0].metadata["gateway_error"].is_string());
    }

    #[tokio::test]
    async fn foreign_subscription_is_forbidden_not_missing() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(Uuid::new_v4(), &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);
        let usecase = usecase(&store, &gateway);

        let forbidden = usecase
            .cancel_subscription(
                &auth_user(Uuid::new_v4()),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: false,
                },
            )
            .await
            .unwrap_err();
        let missing = usecase
            .cancel_subscription(
                &auth_user(Uuid::new_v4()),
                CancelSubscriptionRequest {
                    subscription_id: Some(Uuid::new_v4().to_string()),
                    at_cycle_end: false,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(forbidden.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(missing.status_code(), axum::http::StatusCode::NOT_FOUND);
        assert_eq!(store.subscription(subscription_id).status, "ACTIVE");
    }

    #[tokio::test]
    async fn admin_may_cancel_any_subscription() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(Uuid::new_v4(), &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);

        usecase(&store, &gateway)
            .cancel_subscription(
                &admin_user(),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: false,
                },
            )
            .await
            .unwrap();

        assert_eq!(store.subscription(subscription_id).status, "CANCELLED");
        assert_eq!(store.events()[0].metadata["reason"], "admin_requested");
    }

    #[tokio::test]
    async fn deferred_cancel_sets_both_flags_and_keeps_status() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        let cycle_end = row.current_cycle_end;
        store.add_subscription(row);
        let request = CancelSubscriptionRequest {
            subscription_id: Some(subscription_id.to_string()),
            at_cycle_end: true,
        };
        let usecase = usecase(&store, &gateway);

        let response = usecase
            .cancel_subscription(&auth_user(user_id), request.clone())
            .await
            .unwrap();

        let row = store.subscription(subscription_id);
        assert_eq!(response.status, "ACTIVE");
        assert_eq!(row.status, "ACTIVE");
        assert!(row.cancel_at_cycle_end);
        assert!(row.cancel_requested_at.is_some());
        assert_eq!(row.end_date, cycle_end);
        assert_eq!(store.event_types(), vec!["cancel_requested"]);
        assert!(gateway.calls()[0].ends_with(" true"));

        let again = usecase
            .cancel_subscription(&auth_user(user_id), request)
            .await
            .unwrap_err();
        assert!(matches!(again, SubscriptionError::Conflict(_)));
    }

    #[tokio::test]
    async fn deferred_cancel_requires_known_cycle_end() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let mut row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        row.current_cycle_end = None;
        row.end_date = None;
        let subscription_id = row.id;
        store.add_subscription(row);

        let err = usecase(&store, &gateway)
            .cancel_subscription(
                &auth_user(user_id),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: true,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Conflict(_)));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn plan_change_keeps_paid_cycles() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let quarterly = plan(ServiceCategory::Fitness, 3);
        let yearly = plan(ServiceCategory::Fitness, 12);
        store.add_plan(quarterly.clone());
        store.add_plan(yearly.clone());
        let mut row = subscription_row(user_id, &quarterly, SubscriptionStatus::Active);
        row.paid_count = 10;
        row.remaining_count = 110;
        let subscription_id = row.id;
        store.add_subscription(row);

        let response = usecase(&store, &gateway)
            .change_plan(
                &auth_user(user_id),
                ChangePlanRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    new_plan_id: Some(yearly.id.to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.total_count, 30);
        assert_eq!(response.remaining_count, 20);
        let row = store.subscription(subscription_id);
        assert_eq!(row.plan_id, yearly.id);
        assert_eq!(row.remaining_count, 20);
        assert_eq!(row.paid_count, 10);
        assert!(gateway.calls()[0].ends_with(&format!("{} 20", yearly.gateway_plan_id)));
        assert_eq!(store.event_types(), vec!["plan_changed"]);
    }

    #[tokio::test]
    async fn plan_change_rejects_exhausted_cycles() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let quarterly = plan(ServiceCategory::Psychology, 3);
        let yearly = plan(ServiceCategory::Psychology, 12);
        store.add_plan(quarterly.clone());
        store.add_plan(yearly.clone());
        let mut row = subscription_row(user_id, &quarterly, SubscriptionStatus::Active);
        row.paid_count = 30;
        let subscription_id = row.id;
        store.add_subscription(row);

        let err = usecase(&store, &gateway)
            .change_plan(
                &auth_user(user_id),
                ChangePlanRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    new_plan_id: Some(yearly.id.to_string()),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::Validation(_)));
        assert!(gateway.calls().is_empty());
        assert_eq!(store.subscription(subscription_id).plan_id, quarterly.id);
    }

    #[tokio::test]
    async fn plan_change_rejects_other_category() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        let manifestation = plan(ServiceCategory::Manifestation, 6);
        store.add_plan(fitness.clone());
        store.add_plan(manifestation.clone());
        let row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);

        let err = usecase(&store, &gateway)
            .change_plan(
                &auth_user(user_id),
                ChangePlanRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    new_plan_id: Some(manifestation.id.to_string()),
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "new plan must belong to the same category");
    }

    #[tokio::test]
    async fn plan_change_surfaces_plan_lookup_failure_as_internal() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let quarterly = plan(ServiceCategory::Fitness, 3);
        let row = subscription_row(user_id, &quarterly, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row.clone());

        let mut plan_repo = MockPlanRepository::new();
        plan_repo
            .expect_find_by_id()
            .returning(|_| Err(anyhow!("connection reset by peer")));
        plan_repo.expect_find_active_plan_by_id().times(0);

        let err = SubscriptionUseCase::new(
            Arc::new(plan_repo),
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&gateway),
        )
        .change_plan(
            &auth_user(user_id),
            ChangePlanRequest {
                subscription_id: Some(subscription_id.to_string()),
                new_plan_id: Some(Uuid::new_v4().to_string()),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SubscriptionError::Internal(_)));
        assert_eq!(err.to_string(), "internal server error");
        assert!(gateway.calls().is_empty());
        assert_eq!(store.subscription(subscription_id), row);
    }

    #[tokio::test]
    async fn immediate_cancel_without_gateway_reference_is_recorded() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        let mut row = subscription_row(user_id, &fitness, SubscriptionStatus::Created);
        row.gateway_subscription_id = None;
        let subscription_id = row.id;
        store.add_subscription(row.clone());

        usecase(&store, &gateway)
            .cancel_immediately(&row, CancelReason::PaymentFailed)
            .await
            .unwrap();

        assert!(gateway.calls().is_empty());
        assert_eq!(store.subscription(subscription_id).status, "CANCELLED");
        let events = store.events();
        assert_eq!(events[0].metadata["gateway_cancelled"], false);
        assert_eq!(
            events[0].metadata["gateway_error"],
            "subscription has no gateway reference"
        );
    }

    #[tokio::test]
    async fn reset_payment_status_only_after_failure() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let mut row = subscription_row(user_id, &fitness, SubscriptionStatus::Pending);
        row.payment_status = PaymentStatus::Failed.to_string();
        let subscription_id = row.id;
        store.add_subscription(row);
        let usecase = usecase(&store, &gateway);
        let request = SubscriptionIdRequest {
            subscription_id: Some(subscription_id.to_string()),
        };

        let response = usecase
            .reset_payment_status(&auth_user(user_id), request.clone())
            .await
            .unwrap();
        assert_eq!(response.payment_status, "PENDING");
        assert_eq!(store.subscription(subscription_id).payment_status, "PENDING");

        let err = usecase
            .reset_payment_status(&auth_user(user_id), request)
            .await
            .unwrap_err();
        assert!(matches!(err, SubscriptionError::Conflict(_)));
        assert_eq!(store.event_types(), vec!["payment_status_reset"]);
    }

    #[tokio::test]
    async fn stale_version_surfaces_conflict() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);
        store.force_conflicts(1);

        let err = usecase(&store, &gateway)
            .cancel_subscription(
                &auth_user(user_id),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: false,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn events_are_listed_for_owner() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let user_id = Uuid::new_v4();
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(user_id, &fitness, SubscriptionStatus::Active);
        let subscription_id = row.id;
        store.add_subscription(row);
        let usecase = usecase(&store, &gateway);
        usecase
            .cancel_subscription(
                &auth_user(user_id),
                CancelSubscriptionRequest {
                    subscription_id: Some(subscription_id.to_string()),
                    at_cycle_end: true,
                },
            )
            .await
            .unwrap();

        let events = usecase
            .list_events(&auth_user(user_id), subscription_id)
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "cancel_requested");
    }
}
