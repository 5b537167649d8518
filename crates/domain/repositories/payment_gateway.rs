use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

/// The gateway's view of a subscription after a REST call.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySubscription {
    pub id: String,
    pub status: Option<String>,
    pub short_url: Option<String>,
    pub current_end: Option<DateTime<Utc>>,
}

#[automock]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_subscription(
        &self,
        gateway_plan_id: &str,
        total_count: i32,
        notes: HashMap<String, String>,
    ) -> Result<GatewaySubscription>;

    async fn cancel_subscription(
        &self,
        gateway_subscription_id: &str,
        cancel_at_cycle_end: bool,
    ) -> Result<GatewaySubscription>;

    async fn update_subscription(
        &self,
        gateway_subscription_id: &str,
        gateway_plan_id: &str,
        remaining_count: i32,
    ) -> Result<GatewaySubscription>;

    /// Checks `signature` against an HMAC-SHA256 of the raw `payload` bytes.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()>;
}
