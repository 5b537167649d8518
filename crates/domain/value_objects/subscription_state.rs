use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    entities::user_subscriptions::SubscriptionWithPlan,
    value_objects::enums::{
        payment_statuses::PaymentStatus, service_categories::ServiceCategory,
        subscription_statuses::SubscriptionStatus,
    },
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveState {
    NoSubscriptions,
    ActiveSubscriptions,
    CancellationScheduled,
    MixedState,
}

impl EffectiveState {
    pub fn classify(active: usize, scheduled: usize) -> Self {
        match (active, scheduled) {
            (0, 0) => EffectiveState::NoSubscriptions,
            (_, 0) => EffectiveState::ActiveSubscriptions,
            (0, _) => EffectiveState::CancellationScheduled,
            _ => EffectiveState::MixedState,
        }
    }
}

/// One live subscription as the dashboard sees it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionView {
    pub subscription_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub category: ServiceCategory,
    pub status: SubscriptionStatus,
    pub payment_status: PaymentStatus,
    pub cancel_at_cycle_end: bool,
    pub current_cycle_end: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl TryFrom<&SubscriptionWithPlan> for SubscriptionView {
    type Error = anyhow::Error;

    fn try_from(value: &SubscriptionWithPlan) -> anyhow::Result<Self> {
        let subscription = &value.subscription;
        Ok(Self {
            subscription_id: subscription.id,
            plan_id: value.plan.id,
            plan_name: value.plan.name.clone(),
            category: value.plan.category()?,
            status: subscription.status()?,
            payment_status: subscription.payment_status()?,
            cancel_at_cycle_end: subscription.cancel_at_cycle_end,
            current_cycle_end: subscription.current_cycle_end,
            end_date: subscription.end_date,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubscriptionOverview {
    pub state: EffectiveState,
    pub active: Vec<SubscriptionView>,
    pub scheduled: Vec<SubscriptionView>,
    pub available_categories: Vec<ServiceCategory>,
}

impl SubscriptionOverview {
    /// Partitions live subscriptions into active and scheduled-for-cancellation.
    pub fn from_views(views: Vec<SubscriptionView>) -> Self {
        let (scheduled, active): (Vec<_>, Vec<_>) =
            views.into_iter().partition(|view| view.cancel_at_cycle_end);

        // A scheduled cancellation still occupies its category until it ends.
        let taken: BTreeSet<ServiceCategory> = active
            .iter()
            .chain(scheduled.iter())
            .map(|view| view.category)
            .collect();
        let available_categories = ServiceCategory::ALL
            .into_iter()
            .filter(|category| !taken.contains(category))
            .collect();

        Self {
            state: EffectiveState::classify(active.len(), scheduled.len()),
            active,
            scheduled,
            available_categories,
        }
    }

    pub fn button_state(&self, category: ServiceCategory, plan_name: &str) -> ButtonState {
        if let Some(view) = self.scheduled.iter().find(|view| view.category == category) {
            return ButtonState::Disabled {
                ends_on: view
                    .end_date
                    .or(view.current_cycle_end)
                    .map(|date| date.date_naive()),
            };
        }
        if let Some(view) = self.active.iter().find(|view| view.category == category) {
            return ButtonState::ChangePlan {
                current_plan: view.plan_name.clone(),
            };
        }
        ButtonState::Subscribe {
            plan_name: plan_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ButtonState {
    Subscribe { plan_name: String },
    ChangePlan { current_plan: String },
    Disabled { ends_on: Option<NaiveDate> },
}

impl ButtonState {
    pub fn label(&self) -> String {
        match self {
            ButtonState::Subscribe { .. } => "Subscribe".to_string(),
            ButtonState::ChangePlan { .. } => "Change Plan".to_string(),
            ButtonState::Disabled {
                ends_on: Some(date),
            } => format!("Disabled: ends {}", date.format("%Y-%m-%d")),
            ButtonState::Disabled { ends_on: None } => "Disabled: ends soon".to_string(),
        }
    }
}
