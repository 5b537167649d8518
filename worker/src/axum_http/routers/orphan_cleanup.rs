use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use billing::{
    infra::db::repositories::{
        plans::PlanPostgres, subscription_events::SubscriptionEventPostgres,
        user_subscriptions::UserSubscriptionPostgres,
    },
    payments::razorpay_client::RazorpayClient,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::{
    config::config_model::DotEnvyConfig,
    usecases::orphan_cleanup::{OrphanCleanupParams, OrphanCleanupUseCase},
};

pub type PostgresOrphanCleanup = OrphanCleanupUseCase<
    PlanPostgres,
    UserSubscriptionPostgres,
    SubscriptionEventPostgres,
    RazorpayClient,
>;

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/cleanup/orphan-subscriptions" \
//     -H "Authorization: Bearer $INTERNAL_CLEANUP_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"older_than_minutes":60,"limit":100,"dry_run":true}'

#[derive(Clone)]
pub struct CleanupRouteState {
    config: Arc<DotEnvyConfig>,
    usecase: Arc<PostgresOrphanCleanup>,
}

pub fn routes(config: Arc<DotEnvyConfig>, usecase: Arc<PostgresOrphanCleanup>) -> Router {
    Router::new()
        .route("/orphan-subscriptions", post(cleanup_orphan_subscriptions))
        .with_state(CleanupRouteState { config, usecase })
}

#[derive(Debug, Default, Deserialize)]
pub struct OrphanCleanupRequest {
    pub older_than_minutes: Option<i64>,
    pub limit: Option<i64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct OrphanCleanupResponse {
    pub scanned: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
    pub candidate_ids: Vec<Uuid>,
    pub cancelled_ids: Vec<Uuid>,
    pub failed_ids: Vec<Uuid>,
}

pub async fn cleanup_orphan_subscriptions(
    State(state): State<CleanupRouteState>,
    headers: HeaderMap,
    Json(payload): Json<OrphanCleanupRequest>,
) -> Response {
    let expected_token = match state.config.cleanup.internal_token.as_deref() {
        Some(token) => token,
        None => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "cleanup token is not configured",
            )
                .into_response();
        }
    };

    if let Err(status) = authorize_bearer(&headers, expected_token) {
        return (status, "unauthorized").into_response();
    }

    let params = OrphanCleanupParams {
        older_than_minutes: payload
            .older_than_minutes
            .unwrap_or(state.config.cleanup.orphan_timeout_minutes),
        limit: payload.limit,
        dry_run: payload.dry_run.unwrap_or(false),
    };

    match state.usecase.run(params.clone()).await {
        Ok(result) => Json(OrphanCleanupResponse {
            scanned: result.scanned,
            cancelled: result.cancelled,
            skipped: result.skipped,
            failed: result.failed,
            dry_run: params.dry_run,
            candidate_ids: result.candidate_ids,
            cancelled_ids: result.cancelled_ids,
            failed_ids: result.failed_ids,
        })
        .into_response(),
        Err(err) => {
            error!(error = ?err, "orphan_cleanup: usecase failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "cleanup failed").into_response()
        }
    }
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
