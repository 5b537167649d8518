use std::sync::Arc;

use anyhow::Result;
use billing::domain::{
    repositories::user_subscriptions::UserSubscriptionRepository,
    value_objects::{
        enums::service_categories::ServiceCategory,
        subscription_state::{ButtonState, SubscriptionOverview, SubscriptionView},
    },
};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    usecases::subscriptions::{SubscriptionError, UseCaseResult},
};

/// Loads the live subscriptions of `user_id` and classifies them.
pub(crate) async fn load_overview<S>(subscription_repo: &S, user_id: Uuid) -> Result<SubscriptionOverview>
where
    S: UserSubscriptionRepository + Send + Sync + ?Sized,
{
    let rows = subscription_repo.list_non_terminal_with_plans(user_id).await?;
    let views = rows
        .iter()
        .map(SubscriptionView::try_from)
        .collect::<Result<Vec<_>>>()?;
    Ok(SubscriptionOverview::from_views(views))
}

/// Read side of the subscription lifecycle. Never writes.
pub struct SubscriptionStateUseCase<S>
where
    S: UserSubscriptionRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
}

impl<S> SubscriptionStateUseCase<S>
where
    S: UserSubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>) -> Self {
        Self { subscription_repo }
    }

    pub async fn overview(&self, auth: &AuthUser) -> UseCaseResult<SubscriptionOverview> {
        let user_id = auth.user_id;
        let overview = load_overview(self.subscription_repo.as_ref(), user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "subscription_state: failed to load subscriptions"
                );
                SubscriptionError::Internal(err)
            })?;

        info!(
            %user_id,
            state = ?overview.state,
            active = overview.active.len(),
            scheduled = overview.scheduled.len(),
            "subscription_state: overview computed"
        );

        Ok(overview)
    }

    pub async fn button_state(
        &self,
        auth: &AuthUser,
        category: &str,
        plan_name: &str,
    ) -> UseCaseResult<ButtonState> {
        let category = category
            .parse::<ServiceCategory>()
            .map_err(|err| SubscriptionError::Validation(err.to_string()))?;

        let overview = self.overview(auth).await?;
        Ok(overview.button_state(category, plan_name))
    }
}
