use std::fmt::Display;

use crate::domain::value_objects::enums::{
    payment_statuses::PaymentStatus, subscription_statuses::SubscriptionStatus,
};

/// Webhook event types the payment gateway delivers for subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    SubscriptionAuthenticated,
    SubscriptionActivated,
    SubscriptionCharged,
    SubscriptionPending,
    SubscriptionHalted,
    SubscriptionCancelled,
    SubscriptionCompleted,
    SubscriptionExpired,
    SubscriptionUpdated,
    PaymentFailed,
    Unknown(String),
}

impl GatewayEventKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "subscription.authenticated" => GatewayEventKind::SubscriptionAuthenticated,
            "subscription.activated" => GatewayEventKind::SubscriptionActivated,
            "subscription.charged" => GatewayEventKind::SubscriptionCharged,
            "subscription.pending" => GatewayEventKind::SubscriptionPending,
            "subscription.halted" => GatewayEventKind::SubscriptionHalted,
            "subscription.cancelled" => GatewayEventKind::SubscriptionCancelled,
            "subscription.completed" => GatewayEventKind::SubscriptionCompleted,
            "subscription.expired" => GatewayEventKind::SubscriptionExpired,
            "subscription.updated" => GatewayEventKind::SubscriptionUpdated,
            "payment.failed" => GatewayEventKind::PaymentFailed,
            other => GatewayEventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayEventKind::SubscriptionAuthenticated => "subscription.authenticated",
            GatewayEventKind::SubscriptionActivated => "subscription.activated",
            GatewayEventKind::SubscriptionCharged => "subscription.charged",
            GatewayEventKind::SubscriptionPending => "subscription.pending",
            GatewayEventKind::SubscriptionHalted => "subscription.halted",
            GatewayEventKind::SubscriptionCancelled => "subscription.cancelled",
            GatewayEventKind::SubscriptionCompleted => "subscription.completed",
            GatewayEventKind::SubscriptionExpired => "subscription.expired",
            GatewayEventKind::SubscriptionUpdated => "subscription.updated",
            GatewayEventKind::PaymentFailed => "payment.failed",
            GatewayEventKind::Unknown(raw) => raw,
        }
    }

    /// Status and payment status a subscription takes when this event lands.
    /// `None` means the event does not touch that column.
    pub fn target(&self) -> Option<(Option<SubscriptionStatus>, Option<PaymentStatus>)> {
        let target = match self {
            GatewayEventKind::SubscriptionAuthenticated => {
                (Some(SubscriptionStatus::Authenticated), None)
            }
            GatewayEventKind::SubscriptionActivated | GatewayEventKind::SubscriptionCharged => (
                Some(SubscriptionStatus::Active),
                Some(PaymentStatus::Paid),
            ),
            GatewayEventKind::SubscriptionPending => (
                Some(SubscriptionStatus::Pending),
                Some(PaymentStatus::Failed),
            ),
            GatewayEventKind::SubscriptionHalted => (
                Some(SubscriptionStatus::Halted),
                Some(PaymentStatus::Failed),
            ),
            GatewayEventKind::SubscriptionCancelled => (Some(SubscriptionStatus::Cancelled), None),
            GatewayEventKind::SubscriptionCompleted => (Some(SubscriptionStatus::Completed), None),
            GatewayEventKind::SubscriptionExpired => (Some(SubscriptionStatus::Expired), None),
            GatewayEventKind::SubscriptionUpdated => (None, None),
            GatewayEventKind::PaymentFailed => (None, Some(PaymentStatus::Failed)),
            GatewayEventKind::Unknown(_) => return None,
        };
        Some(target)
    }
}

impl Display for GatewayEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_events_round_trip_their_name() {
        for name in [
            "subscription.authenticated",
            "subscription.activated",
            "subscription.charged",
            "subscription.cancelled",
            "subscription.updated",
            "payment.failed",
        ] {
            let kind = GatewayEventKind::parse(name);
            assert!(!matches!(kind, GatewayEventKind::Unknown(_)));
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn unknown_events_have_no_target() {
        let kind = GatewayEventKind::parse("invoice.paid");
        assert_eq!(kind, GatewayEventKind::Unknown("invoice.paid".to_string()));
        assert_eq!(kind.target(), None);
    }

    #[test]
    fn charged_marks_subscription_paid() {
        assert_eq!(
            GatewayEventKind::SubscriptionCharged.target(),
            Some((Some(SubscriptionStatus::Active), Some(PaymentStatus::Paid)))
        );
    }
}
