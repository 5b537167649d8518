use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use billing::{
    domain::{
        repositories::{
            payment_gateway::PaymentGateway, plans::PlanRepository,
            subscription_events::SubscriptionEventRepository,
            user_subscriptions::UserSubscriptionRepository,
        },
        value_objects::{
            subscription_state::ButtonState,
            subscriptions::{
                ButtonStateQuery, CancelSubscriptionRequest, ChangePlanRequest,
                CreateSubscriptionRequest, SubscriptionIdRequest,
            },
        },
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            plans::PlanPostgres, subscription_events::SubscriptionEventPostgres,
            user_subscriptions::UserSubscriptionPostgres,
        },
    },
    payments::razorpay_client::RazorpayClient,
};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    usecases::{
        subscription_state::SubscriptionStateUseCase,
        subscriptions::{SubscriptionError, SubscriptionUseCase},
    },
};

pub struct SubscriptionRouteState<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub subscriptions: Arc<SubscriptionUseCase<P, S, E, G>>,
    pub state: Arc<SubscriptionStateUseCase<S>>,
}

// Manual impl: a derive would require the repositories themselves to be Clone.
impl<P, S, E, G> Clone for SubscriptionRouteState<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
            state: Arc::clone(&self.state),
        }
    }
}

pub fn routes(db_pool: Arc<PgPoolSquad>, razorpay: Arc<RazorpayClient>) -> Router {
    let plan_repository = Arc::new(PlanPostgres::new(Arc::clone(&db_pool)));
    let subscription_repository = Arc::new(UserSubscriptionPostgres::new(Arc::clone(&db_pool)));
    let event_repository = Arc::new(SubscriptionEventPostgres::new(Arc::clone(&db_pool)));

    let subscriptions_usecase = SubscriptionUseCase::new(
        plan_repository,
        Arc::clone(&subscription_repository),
        event_repository,
        razorpay,
    );
    let state_usecase = SubscriptionStateUseCase::new(subscription_repository);

    Router::new()
        .route("/plans", get(list_plans))
        .route("/overview", get(overview))
        .route("/button-state", get(button_state))
        .route("/subscribe", post(subscribe))
        .route("/cancel", post(cancel_subscription))
        .route("/change-plan", post(change_plan))
        .route("/reset-payment-status", post(reset_payment_status))
        .route("/:subscription_id/events", get(list_events))
        .with_state(SubscriptionRouteState {
            subscriptions: Arc::new(subscriptions_usecase),
            state: Arc::new(state_usecase),
        })
}

#[derive(Debug, Serialize)]
pub struct ButtonStateResponse {
    #[serde(flatten)]
    pub state: ButtonState,
    pub label: String,
}

pub async fn list_plans<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    _auth: AuthUser,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state.subscriptions.list_plans().await {
        Ok(plans) => Json(plans).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn overview<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state.state.overview(&auth).await {
        Ok(overview) => Json(overview).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn button_state<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Query(query): Query<ButtonStateQuery>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state
        .state
        .button_state(&auth, &query.category, &query.plan_name)
        .await
    {
        Ok(state) => Json(ButtonStateResponse {
            label: state.label(),
            state,
        })
        .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn subscribe<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state
        .subscriptions
        .create_subscription(&auth, request)
        .await
    {
        Ok(created) => (axum::http::StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn cancel_subscription<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state
        .subscriptions
        .cancel_subscription(&auth, request)
        .await
    {
        Ok(cancelled) => Json(cancelled).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn change_plan<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Json(request): Json<ChangePlanRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state.subscriptions.change_plan(&auth, request).await {
        Ok(changed) => Json(changed).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn reset_payment_status<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Json(request): Json<SubscriptionIdRequest>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    match route_state
        .subscriptions
        .reset_payment_status(&auth, request)
        .await
    {
        Ok(reset) => Json(reset).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_events<P, S, E, G>(
    State(route_state): State<SubscriptionRouteState<P, S, E, G>>,
    auth: AuthUser,
    Path(subscription_id): Path<String>,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let subscription_id = match (SubscriptionIdRequest {
        subscription_id: Some(subscription_id),
    })
    .validate()
    {
        Ok(subscription_id) => subscription_id,
        Err(err) => return SubscriptionError::Validation(err.to_string()).into_response(),
    };

    match route_state
        .subscriptions
        .list_events(&auth, subscription_id)
        .await
    {
        Ok(events) => Json(events).into_response(),
        Err(err) => err.into_response(),
    }
}
