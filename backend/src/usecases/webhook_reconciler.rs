use std::sync::Arc;

use anyhow::anyhow;
use billing::{
    domain::{
        entities::{
            subscription_events::InsertSubscriptionEventEntity,
            user_subscriptions::{UserSubscriptionChangeset, UserSubscriptionEntity},
        },
        repositories::{
            payment_gateway::PaymentGateway, plans::PlanRepository,
            subscription_events::SubscriptionEventRepository,
            user_subscriptions::UserSubscriptionRepository,
        },
        value_objects::gateway_events::GatewayEventKind,
    },
    payments::razorpay_client::{RazorpaySubscription, RazorpayWebhookEvent},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Attempts per delivery before a lost version race becomes a 500.
pub const MAX_APPLY_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook body is empty")]
    EmptyBody,
    #[error("webhook body is not valid JSON")]
    MalformedJson(#[source] serde_json::Error),
    #[error("missing webhook signature header")]
    MissingSignature,
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("webhook event type is missing")]
    MissingEventType,
    #[error("failed to process webhook")]
    Processing(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::EmptyBody
            | WebhookError::MalformedJson(_)
            | WebhookError::MissingSignature
            | WebhookError::MissingEventType => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// What happened to an accepted delivery. Every variant is acknowledged with 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    /// Redelivery: the row already matched the event.
    Unchanged,
    /// The transition guard refused the event; only the log was written.
    Refused,
    /// Unknown event kind or subscription.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Unchanged => "unchanged",
            WebhookOutcome::Refused => "refused",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

enum Projection {
    Apply(UserSubscriptionChangeset),
    Refuse(String),
}

pub struct WebhookReconcilerUseCase<P, S, E, G>
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

impl<P, S, E, G> WebhookReconcilerUseCase<P, S, E, G>
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

    /// Verifies and reconciles one delivery. `payload` must be the raw body
    /// exactly as received.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            warn!("razorpay webhook: empty body");
            return Err(WebhookError::EmptyBody);
        }
        let raw: Value = serde_json::from_slice(payload).map_err(|err| {
            warn!(error = %err, "razorpay webhook: body is not JSON");
            WebhookError::MalformedJson(err)
        })?;

        let signature = signature
            .map(str::trim)
            .filter(|signature| !signature.is_empty())
            .ok_or_else(|| {
                warn!("razorpay webhook: missing signature header");
                WebhookError::MissingSignature
            })?;
        self.gateway
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "razorpay webhook: signature verification failed");
                WebhookError::InvalidSignature
            })?;

        let event_name = raw
            .get("event")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|event| !event.is_empty())
            .ok_or(WebhookError::MissingEventType)?;

        let kind = GatewayEventKind::parse(event_name);
        info!(event = %kind, "razorpay webhook: verified delivery");

        // Unhandled kinds may carry payloads of any shape.
        if kind.target().is_none() {
            info!(event = %kind, "razorpay webhook: unhandled event ignored");
            return Ok(WebhookOutcome::Ignored);
        }

        let delivery: RazorpayWebhookEvent =
            serde_json::from_value(raw.clone()).map_err(|err| {
                warn!(event = %kind, error = %err, "razorpay webhook: unexpected payload shape");
                WebhookError::MalformedJson(err)
            })?;

        let entity = delivery.payload.subscription.map(|wrapper| wrapper.entity);
        let gateway_subscription_id = entity
            .as_ref()
            .map(|entity| entity.id.clone())
            .or_else(|| {
                delivery
                    .payload
                    .payment
                    .as_ref()
                    .and_then(|payment| payment.entity.subscription_id.clone())
            });
        let Some(gateway_subscription_id) = gateway_subscription_id else {
            warn!(event = %kind, "razorpay webhook: no subscription reference in payload");
            return Ok(WebhookOutcome::Ignored);
        };

        let plan_id = self.resolve_plan(&kind, entity.as_ref()).await?;

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            let Some(row) = self
                .subscription_repo
                .find_by_gateway_subscription_id(&gateway_subscription_id)
                .await?
            else {
                warn!(
                    %gateway_subscription_id,
                    event = %kind,
                    "razorpay webhook: unknown subscription"
                );
                return Ok(WebhookOutcome::Ignored);
            };
            let subscription_id = row.id;

            let changes = match project(&row, &kind, entity.as_ref(), plan_id)? {
                Projection::Apply(changes) => changes,
                Projection::Refuse(reason) => {
                    warn!(
                        %subscription_id,
                        event = %kind,
                        status = %row.status,
                        %reason,
                        "razorpay webhook: transition refused"
                    );
                    self.event_repo
                        .append(delivery_event(&row, &kind, "refused", &raw))
                        .await?;
                    return Ok(WebhookOutcome::Refused);
                }
            };

            if row.with_changes(&changes) == row {
                debug!(%subscription_id, event = %kind, "razorpay webhook: redelivery, row unchanged");
                self.event_repo
                    .append(delivery_event(&row, &kind, "unchanged", &raw))
                    .await?;
                return Ok(WebhookOutcome::Unchanged);
            }

            let event = delivery_event(&row, &kind, "applied", &raw);
            if self
                .subscription_repo
                .update_with_event(subscription_id, row.version, changes, event)
                .await?
            {
                info!(
                    %subscription_id,
                    event = %kind,
                    attempt,
                    "razorpay webhook: subscription reconciled"
                );
                return Ok(WebhookOutcome::Applied);
            }

            warn!(
                %subscription_id,
                event = %kind,
                attempt,
                "razorpay webhook: version conflict, re-reading row"
            );
        }

        error!(
            %gateway_subscription_id,
            event = %kind,
            "razorpay webhook: version conflicts exhausted retries"
        );
        Err(WebhookError::Processing(anyhow!(
            "subscription {gateway_subscription_id} kept changing after {MAX_APPLY_ATTEMPTS} attempts"
        )))
    }

    /// Local plan for the gateway plan named by a `subscription.updated` event.
    async fn resolve_plan(
        &self,
        kind: &GatewayEventKind,
        entity: Option<&RazorpaySubscription>,
    ) -> Result<Option<Uuid>, WebhookError> {
        if *kind != GatewayEventKind::SubscriptionUpdated {
            return Ok(None);
        }
        let Some(gateway_plan_id) = entity.and_then(|entity| entity.plan_id.as_deref()) else {
            return Ok(None);
        };

        let plan = self.plan_repo.find_by_gateway_plan_id(gateway_plan_id).await?;
        if plan.is_none() {
            warn!(gateway_plan_id, "razorpay webhook: updated to a plan missing from the catalog");
        }
        Ok(plan.map(|plan| plan.id))
    }
}

/// Maps an event onto the stored row. Every field is assigned the absolute
/// value the gateway reports, so replaying a delivery converges.
fn project(
    row: &UserSubscriptionEntity,
    kind: &GatewayEventKind,
    entity: Option<&RazorpaySubscription>,
    plan_id: Option<Uuid>,
) -> anyhow::Result<Projection> {
    let Some((next_status, next_payment)) = kind.target() else {
        return Ok(Projection::Refuse(format!("unhandled event {kind}")));
    };
    let current = row.status()?;

    match next_status {
        Some(next) if !current.accepts(next) => {
            return Ok(Projection::Refuse(format!("{current} cannot become {next}")));
        }
        None if current.is_terminal() => {
            return Ok(Projection::Refuse(format!("{current} is final")));
        }
        _ => {}
    }

    let mut changes = UserSubscriptionChangeset {
        plan_id,
        status: next_status.map(|status| status.to_string()),
        payment_status: next_payment.map(|status| status.to_string()),
        ..Default::default()
    };

    if let Some(entity) = entity {
        if let Some(start) = entity.current_start_at() {
            changes.current_cycle_start = Some(Some(start));
        }
        if let Some(end) = entity.current_end_at() {
            changes.current_cycle_end = Some(Some(end));
        }
        if let Some(started) = entity.started_at() {
            changes.start_date = Some(Some(started));
        }
        if let Some(ends) = entity.ends_at() {
            changes.end_date = Some(Some(ends));
        }
        changes.total_count = entity.total_count;
        changes.paid_count = entity.paid_count;
        changes.remaining_count = entity.remaining_count;
    }

    Ok(Projection::Apply(changes))
}

fn delivery_event(
    row: &UserSubscriptionEntity,
    kind: &GatewayEventKind,
    outcome: &str,
    raw: &Value,
) -> InsertSubscriptionEventEntity {
    InsertSubscriptionEventEntity::for_subscription(
        kind.as_str(),
        row.user_id,
        row.id,
        row.plan_id,
        json!({
            "outcome": outcome,
            "previous_status": row.status,
            "payload": raw.get("payload").cloned().unwrap_or(Value::Null),
        }),
    )
}
