use std::{fmt::Display, str::FromStr};

use anyhow::{Error, bail};
use serde::{Deserialize, Serialize};

/// Lifecycle of a user subscription as mirrored from the payment gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Created,
    Authenticated,
    Active,
    Pending,
    Halted,
    Cancelled,
    Expired,
    Completed,
}

impl SubscriptionStatus {
    /// Statuses the state reader treats as a live subscription.
    pub const NON_TERMINAL: [SubscriptionStatus; 4] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Created,
        SubscriptionStatus::Authenticated,
        SubscriptionStatus::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Created => "CREATED",
            SubscriptionStatus::Authenticated => "AUTHENTICATED",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::Halted => "HALTED",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Expired => "EXPIRED",
            SubscriptionStatus::Completed => "COMPLETED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled
                | SubscriptionStatus::Expired
                | SubscriptionStatus::Completed
        )
    }

    pub fn is_non_terminal(&self) -> bool {
        Self::NON_TERMINAL.contains(self)
    }

    /// Whether a row currently in `self` may move to `next`.
    ///
    /// Terminal statuses only accept themselves, so a late or redelivered
    /// gateway event can never resurrect a finished subscription, and an
    /// active subscription never falls back to a pre-activation status.
    pub fn accepts(&self, next: SubscriptionStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        !matches!(
            (self, next),
            (
                SubscriptionStatus::Active,
                SubscriptionStatus::Created | SubscriptionStatus::Authenticated
            )
        )
    }
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATED" => Ok(SubscriptionStatus::Created),
            "AUTHENTICATED" => Ok(SubscriptionStatus::Authenticated),
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "PENDING" => Ok(SubscriptionStatus::Pending),
            "HALTED" => Ok(SubscriptionStatus::Halted),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            "EXPIRED" => Ok(SubscriptionStatus::Expired),
            "COMPLETED" => Ok(SubscriptionStatus::Completed),
            other => bail!("unknown subscription status: {other}"),
        }
    }
}
