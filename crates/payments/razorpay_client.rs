use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use sha2::Sha256;
use tracing::error;

use crate::domain::repositories::payment_gateway::{GatewaySubscription, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Minimal Razorpay client built on reqwest.
pub struct RazorpayClient {
    http: reqwest::Client,
    api_base_url: String,
    key_id: String,
    key_secret: String,
    webhook_secret: String,
}

/// Body of a webhook delivery. Only the parts the reconciler reads are typed.
#[derive(Debug, Deserialize)]
pub struct RazorpayWebhookEvent {
    pub event: Option<String>,
    pub account_id: Option<String>,
    pub created_at: Option<i64>,
    #[serde(default)]
    pub payload: RazorpayWebhookPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct RazorpayWebhookPayload {
    pub subscription: Option<RazorpayEntityWrapper<RazorpaySubscription>>,
    pub payment: Option<RazorpayEntityWrapper<RazorpayPayment>>,
}

#[derive(Debug, Deserialize)]
pub struct RazorpayEntityWrapper<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpaySubscription {
    pub id: String,
    pub plan_id: Option<String>,
    pub status: Option<String>,
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub ended_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_count: Option<i32>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub paid_count: Option<i32>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub remaining_count: Option<i32>,
    pub short_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayPayment {
    pub id: String,
    pub status: Option<String>,
    pub subscription_id: Option<String>,
    pub error_code: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorEnvelope {
    error: RazorpayErrorDetails,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetails {
    code: Option<String>,
    description: Option<String>,
    reason: Option<String>,
    field: Option<String>,
}

// Counts arrive as numbers from the REST API but have been seen as strings in
// webhook bodies.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(number)) => {
            number.as_i64().and_then(|n| i32::try_from(n).ok())
        }
        Some(serde_json::Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

pub fn ts_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

impl RazorpaySubscription {
    pub fn current_start_at(&self) -> Option<DateTime<Utc>> {
        self.current_start.and_then(ts_to_datetime)
    }

    pub fn current_end_at(&self) -> Option<DateTime<Utc>> {
        self.current_end.and_then(ts_to_datetime)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_at.and_then(ts_to_datetime)
    }

    /// When the subscription stops (or stopped) billing: the actual end if the
    /// gateway reported one, otherwise the scheduled end.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at.or(self.end_at).and_then(ts_to_datetime)
    }
}

impl From<RazorpaySubscription> for GatewaySubscription {
    fn from(value: RazorpaySubscription) -> Self {
        Self {
            current_end: value.current_end_at(),
            id: value.id,
            status: value.status,
            short_url: value.short_url,
        }
    }
}

impl RazorpayClient {
    pub fn new(
        api_base_url: String,
        key_id: String,
        key_secret: String,
        webhook_secret: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
            webhook_secret,
        }
    }

    async fn ensure_success(resp: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let (error_code, error_description, error_reason, error_field) =
            match serde_json::from_str::<RazorpayErrorEnvelope>(&body) {
                Ok(envelope) => {
                    let details = envelope.error;
                    (
                        details.code,
                        details.description,
                        details.reason,
                        details.field,
                    )
                }
                Err(_) => (None, None, None, None),
            };

        error!(
            status = %status,
            razorpay_error_code = ?error_code,
            razorpay_error_description = ?error_description,
            razorpay_error_reason = ?error_reason,
            razorpay_error_field = ?error_field,
            response_body = %body,
            context = %context,
            "razorpay api request failed"
        );

        anyhow::bail!("Razorpay API request failed: {} (status {})", context, status);
    }

    /// Creates a subscription against a gateway plan. https://razorpay.com/docs/api/payments/subscriptions/create-subscription
    pub async fn create_subscription(
        &self,
        plan_id: &str,
        total_count: i32,
        notes: HashMap<String, String>,
    ) -> Result<RazorpaySubscription> {
        let body = json!({
            "plan_id": plan_id,
            "total_count": total_count,
            "customer_notify": 1,
            "notes": notes,
        });

        let resp = self
            .http
            .post(format!("{}/subscriptions", self.api_base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create subscription").await?;

        Ok(resp.json().await?)
    }

    /// Cancels now, or at the end of the current cycle when `cancel_at_cycle_end` is set.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<RazorpaySubscription> {
        let body = json!({ "cancel_at_cycle_end": u8::from(cancel_at_cycle_end) });

        let resp = self
            .http
            .post(format!(
                "{}/subscriptions/{}/cancel",
                self.api_base_url, subscription_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "cancel subscription").await?;

        Ok(resp.json().await?)
    }

    /// Moves a subscription to another plan right away.
    pub async fn update_subscription(
        &self,
        subscription_id: &str,
        plan_id: &str,
        remaining_count: i32,
    ) -> Result<RazorpaySubscription> {
        let body = json!({
            "plan_id": plan_id,
            "remaining_count": remaining_count,
            "schedule_change_at": "now",
            "customer_notify": 1,
        });

        let resp = self
            .http
            .patch(format!(
                "{}/subscriptions/{}",
                self.api_base_url, subscription_id
            ))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "update subscription").await?;

        Ok(resp.json().await?)
    }

    /// Verifies a webhook signature over the exact bytes received.
    /// https://razorpay.com/docs/webhooks/validate-test/
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()> {
        let provided =
            hex::decode(signature.trim()).context("webhook signature is not valid hex")?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|err| anyhow!("invalid webhook secret: {err}"))?;
        mac.update(payload);
        // verify_slice compares in constant time.
        mac.verify_slice(&provided)
            .map_err(|_| anyhow!("invalid webhook signature"))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_subscription(
        &self,
        gateway_plan_id: &str,
        total_count: i32,
        notes: HashMap<String, String>,
    ) -> Result<GatewaySubscription> {
        let subscription =
            RazorpayClient::create_subscription(self, gateway_plan_id, total_count, notes).await?;
        Ok(subscription.into())
    }

    async fn cancel_subscription(
        &self,
        gateway_subscription_id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<GatewaySubscription> {
        let subscription =
            RazorpayClient::cancel_subscription(self, gateway_subscription_id, cancel_at_cycle_end)
                .await?;
        Ok(subscription.into())
    }

    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        gateway_plan_id: &str,
        remaining_count: i32,
    ) -> Result<GatewaySubscription> {
        let subscription = RazorpayClient::update_subscription(
            self,
            gateway_subscription_id,
            gateway_plan_id,
            remaining_count,
        )
        .await?;
        Ok(subscription.into())
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()> {
        RazorpayClient::verify_webhook_signature(self, payload, signature)
    }
}
