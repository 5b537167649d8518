use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use billing::{
    domain::repositories::{
        payment_gateway::PaymentGateway, plans::PlanRepository,
        subscription_events::SubscriptionEventRepository,
        user_subscriptions::UserSubscriptionRepository,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            plans::PlanPostgres, subscription_events::SubscriptionEventPostgres,
            user_subscriptions::UserSubscriptionPostgres,
        },
    },
    payments::razorpay_client::{RazorpayClient, SIGNATURE_HEADER},
};
use serde_json::json;
use tracing::error;

use crate::usecases::webhook_reconciler::{WebhookError, WebhookReconcilerUseCase};

// Local run example
//   curl -X POST "http://localhost:$SERVER_PORT_BACKEND/api/v1/webhooks/razorpay" \
//     -H "x-razorpay-signature: $SIGNATURE" \
//     -H "Content-Type: application/json" \
//     --data-binary @payload.json

pub fn routes(db_pool: Arc<PgPoolSquad>, razorpay: Arc<RazorpayClient>) -> Router {
    let usecase = WebhookReconcilerUseCase::new(
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(UserSubscriptionPostgres::new(Arc::clone(&db_pool))),
        Arc::new(SubscriptionEventPostgres::new(Arc::clone(&db_pool))),
        razorpay,
    );

    Router::new()
        .route("/", post(razorpay_webhook))
        .with_state(Arc::new(usecase))
}

/// Takes the body as raw bytes: the signature covers exactly what was sent.
pub async fn razorpay_webhook<P, S, E, G>(
    State(usecase): State<Arc<WebhookReconcilerUseCase<P, S, E, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match usecase.handle(&body, signature).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({ "status": outcome.as_str() })),
        )
            .into_response(),
        Err(err) => {
            if let WebhookError::Processing(cause) = &err {
                error!(error = ?cause, "razorpay webhook: processing failed, asking for redelivery");
            }
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::{InMemoryStore, plan, subscription_row};
    use billing::domain::value_objects::enums::{
        service_categories::ServiceCategory, subscription_statuses::SubscriptionStatus,
    };
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use uuid::Uuid;

    const WEBHOOK_SECRET: &str = "whsec_test";

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn usecase(
        store: &Arc<InMemoryStore>,
    ) -> Arc<WebhookReconcilerUseCase<InMemoryStore, InMemoryStore, InMemoryStore, RazorpayClient>>
    {
        Arc::new(WebhookReconcilerUseCase::new(
            Arc::clone(store),
            Arc::clone(store),
            Arc::clone(store),
            Arc::new(RazorpayClient::new(
                "http://127.0.0.1:9".to_string(),
                "rzp_test_key".to_string(),
                "rzp_test_secret".to_string(),
                WEBHOOK_SECRET.to_string(),
            )),
        ))
    }

    fn headers(signature: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(signature) = signature {
            headers.insert(SIGNATURE_HEADER, signature.parse().unwrap());
        }
        headers
    }

    fn activated_body(gateway_subscription_id: &str) -> Bytes {
        Bytes::from(
            serde_json::to_vec(&json!({
                "event": "subscription.activated",
                "payload": {
                    "subscription": {
                        "entity": {
                            "id": gateway_subscription_id,
                            "status": "active",
                            "current_start": 1_767_225_600,
                            "current_end": 1_775_001_600,
                            "paid_count": 1,
                            "remaining_count": 119,
                            "total_count": 120,
                        }
                    }
                }
            }))
            .unwrap(),
        )
    }

    fn seeded_store() -> (Arc<InMemoryStore>, Uuid, String) {
        let store = Arc::new(InMemoryStore::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());
        let row = subscription_row(Uuid::new_v4(), &fitness, SubscriptionStatus::Created);
        let gateway_subscription_id = row.gateway_subscription_id.clone().unwrap();
        let subscription_id = row.id;
        store.add_subscription(row);
        (store, subscription_id, gateway_subscription_id)
    }

    #[tokio::test]
    async fn correctly_signed_delivery_is_applied() {
        let (store, subscription_id, gateway_subscription_id) = seeded_store();
        let body = activated_body(&gateway_subscription_id);
        let signature = sign(&body);

        let response =
            razorpay_webhook(State(usecase(&store)), headers(Some(&signature)), body).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.subscription(subscription_id).status, "ACTIVE");
    }

    #[tokio::test]
    async fn tampered_body_is_unauthorized() {
        let (store, subscription_id, gateway_subscription_id) = seeded_store();
        let signature = sign(&activated_body(&gateway_subscription_id));
        let tampered = Bytes::from(
            String::from_utf8(activated_body(&gateway_subscription_id).to_vec())
                .unwrap()
                .replace("\"paid_count\":1", "\"paid_count\":2"),
        );

        let response =
            razorpay_webhook(State(usecase(&store)), headers(Some(&signature)), tampered).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.subscription(subscription_id).status, "CREATED");
    }

    #[tokio::test]
    async fn missing_header_is_bad_request() {
        let (store, _, gateway_subscription_id) = seeded_store();

        let response = razorpay_webhook(
            State(usecase(&store)),
            headers(None),
            activated_body(&gateway_subscription_id),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn empty_body_is_bad_request() {
        let (store, _, _) = seeded_store();

        let response =
            razorpay_webhook(State(usecase(&store)), headers(Some("00")), Bytes::new()).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
