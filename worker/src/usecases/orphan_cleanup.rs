use std::sync::Arc;

use anyhow::Result;
use backend::usecases::subscriptions::{CancelReason, SubscriptionUseCase};
use billing::domain::{
    repositories::{
        payment_gateway::PaymentGateway, plans::PlanRepository,
        subscription_events::SubscriptionEventRepository,
        user_subscriptions::UserSubscriptionRepository,
    },
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Id lists in the report are capped; the counters are not.
const MAX_REPORTED_IDS: usize = 20;

#[derive(Debug, Clone)]
pub struct OrphanCleanupParams {
    pub older_than_minutes: i64,
    pub limit: Option<i64>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OrphanCleanupResult {
    pub scanned: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
    pub candidate_ids: Vec<Uuid>,
    pub cancelled_ids: Vec<Uuid>,
    pub failed_ids: Vec<Uuid>,
}

fn push_capped(ids: &mut Vec<Uuid>, id: Uuid) {
    if ids.len() < MAX_REPORTED_IDS {
        ids.push(id);
    }
}

/// Cancels subscriptions whose checkout was never confirmed by the gateway.
pub struct OrphanCleanupUseCase<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    subscription_repo: Arc<S>,
    subscriptions: Arc<SubscriptionUseCase<P, S, E, G>>,
}

impl<P, S, E, G> OrphanCleanupUseCase<P, S, E, G>
where
    P: PlanRepository + Send + Sync + 'static,
    S: UserSubscriptionRepository + Send + Sync + 'static,
    E: SubscriptionEventRepository + Send + Sync + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(subscription_repo: Arc<S>, subscriptions: Arc<SubscriptionUseCase<P, S, E, G>>) -> Self {
        Self {
            subscription_repo,
            subscriptions,
        }
    }

    /// Best effort: a row that fails is logged and counted, the batch goes on.
    pub async fn run(&self, params: OrphanCleanupParams) -> Result<OrphanCleanupResult> {
        let older_than = Utc::now() - Duration::minutes(params.older_than_minutes.max(0));
        let limit = params.limit.filter(|l| *l > 0);

        let candidates = self
            .subscription_repo
            .list_created_before(older_than, limit)
            .await?;

        let mut result = OrphanCleanupResult {
            scanned: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            push_capped(&mut result.candidate_ids, candidate.id);
            if params.dry_run {
                continue;
            }

            // The gateway may have confirmed the checkout since the scan.
            let current = match self.subscription_repo.find_by_id(candidate.id).await {
                Ok(Some(current)) => current,
                Ok(None) => {
                    result.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!(
                        subscription_id = %candidate.id,
                        db_error = ?err,
                        "orphan_cleanup: failed to re-read subscription"
                    );
                    result.failed += 1;
                    push_capped(&mut result.failed_ids, candidate.id);
                    continue;
                }
            };
            if current.status != SubscriptionStatus::Created.as_str() {
                info!(
                    subscription_id = %current.id,
                    status = %current.status,
                    "orphan_cleanup: subscription moved on since scan; skipping"
                );
                result.skipped += 1;
                continue;
            }

            match self
                .subscriptions
                .cancel_immediately(&current, CancelReason::PaymentFailed)
                .await
            {
                Ok(_) => {
                    result.cancelled += 1;
                    push_capped(&mut result.cancelled_ids, current.id);
                }
                Err(err) => {
                    warn!(
                        subscription_id = %current.id,
                        error = ?err,
                        "orphan_cleanup: failed to cancel abandoned subscription"
                    );
                    result.failed += 1;
                    push_capped(&mut result.failed_ids, current.id);
                }
            }
        }

        info!(
            scanned = result.scanned,
            cancelled = result.cancelled,
            skipped = result.skipped,
            failed = result.failed,
            dry_run = params.dry_run,
            "orphan_cleanup: completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use backend::usecases::test_support::{FakeGateway, InMemoryStore, plan, subscription_row};
    use billing::domain::value_objects::enums::service_categories::ServiceCategory;
    use billing::domain::{
        entities::user_subscriptions::UserSubscriptionEntity,
        repositories::{
            payment_gateway::{GatewaySubscription, MockPaymentGateway},
            plans::MockPlanRepository,
            subscription_events::MockSubscriptionEventRepository,
            user_subscriptions::MockUserSubscriptionRepository,
        },
    };
    use mockall::predicate::eq;

    fn created_row(age_minutes: i64) -> UserSubscriptionEntity {
        let created_at = Utc::now() - Duration::minutes(age_minutes);
        UserSubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: "CREATED".to_string(),
            payment_status: "PENDING".to_string(),
            gateway_subscription_id: Some(format!("sub_{}", Uuid::new_v4().simple())),
            start_date: None,
            end_date: None,
            current_cycle_start: None,
            current_cycle_end: None,
            total_count: 120,
            paid_count: 0,
            remaining_count: 120,
            cancel_requested_at: None,
            cancel_at_cycle_end: false,
            version: 1,
            created_at,
            updated_at: created_at,
        }
    }

    fn cancelled_at_gateway(id: &str) -> GatewaySubscription {
        GatewaySubscription {
            id: id.to_string(),
            status: Some("cancelled".to_string()),
            short_url: None,
            current_end: None,
        }
    }

    fn usecase(
        subscription_repo: MockUserSubscriptionRepository,
        gateway: MockPaymentGateway,
    ) -> OrphanCleanupUseCase<
        MockPlanRepository,
        MockUserSubscriptionRepository,
        MockSubscriptionEventRepository,
        MockPaymentGateway,
    > {
        let subscription_repo = Arc::new(subscription_repo);
        let subscriptions = Arc::new(SubscriptionUseCase::new(
            Arc::new(MockPlanRepository::new()),
            Arc::clone(&subscription_repo),
            Arc::new(MockSubscriptionEventRepository::new()),
            Arc::new(gateway),
        ));
        OrphanCleanupUseCase::new(subscription_repo, subscriptions)
    }

    fn params(dry_run: bool) -> OrphanCleanupParams {
        OrphanCleanupParams {
            older_than_minutes: 60,
            limit: None,
            dry_run,
        }
    }

    #[tokio::test]
    async fn stale_created_subscription_is_cancelled_as_payment_failed() {
        let stale = created_row(90);
        let stale_id = stale.id;
        let listed = stale.clone();

        let mut subscription_repo = MockUserSubscriptionRepository::new();
        subscription_repo
            .expect_list_created_before()
            .withf(|cutoff, limit| {
                let age = Utc::now() - *cutoff;
                age >= Duration::minutes(59) && age <= Duration::minutes(61) && limit.is_none()
            })
            .times(1)
            .returning(move |_, _| Ok(vec![listed.clone()]));
        subscription_repo
            .expect_find_by_id()
            .with(eq(stale_id))
            .returning(move |_| Ok(Some(stale.clone())));
        subscription_repo
            .expect_update_with_event()
            .withf(move |id, version, changes, event| {
                *id == stale_id
                    && *version == 1
                    && changes.status.as_deref() == Some("CANCELLED")
                    && event.event_type == "subscription.cancelled"
                    && event.metadata["reason"] == "payment_failed"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_cancel_subscription()
            .withf(|_, at_cycle_end| !*at_cycle_end)
            .times(1)
            .returning(|id, _| Ok(cancelled_at_gateway(id)));

        let result = usecase(subscription_repo, gateway)
            .run(params(false))
            .await
            .unwrap();

        assert_eq!(result.scanned, 1);
        assert_eq!(result.cancelled, 1);
        assert_eq!(result.cancelled_ids, vec![stale_id]);
        assert_eq!(result.failed, 0);
    }

    #[tokio::test]
    async fn dry_run_only_reports_candidates() {
        let stale = created_row(120);
        let stale_id = stale.id;

        let mut subscription_repo = MockUserSubscriptionRepository::new();
        subscription_repo
            .expect_list_created_before()
            .returning(move |_, _| Ok(vec![stale.clone()]));
        subscription_repo.expect_find_by_id().times(0);
        subscription_repo.expect_update_with_event().times(0);
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_subscription().times(0);

        let result = usecase(subscription_repo, gateway)
            .run(params(true))
            .await
            .unwrap();

        assert_eq!(result.scanned, 1);
        assert_eq!(result.candidate_ids, vec![stale_id]);
        assert_eq!(result.cancelled, 0);
    }

    #[tokio::test]
    async fn one_failing_row_does_not_abort_the_batch() {
        let failing = created_row(180);
        let healthy = created_row(75);
        let failing_id = failing.id;
        let healthy_id = healthy.id;
        let listed = vec![failing.clone(), healthy.clone()];

        let mut subscription_repo = MockUserSubscriptionRepository::new();
        subscription_repo
            .expect_list_created_before()
            .returning(move |_, _| Ok(listed.clone()));
        subscription_repo.expect_find_by_id().returning(move |id| {
            Ok([failing.clone(), healthy.clone()]
                .into_iter()
                .find(|row| row.id == id))
        });
        subscription_repo
            .expect_update_with_event()
            .returning(move |id, _, _, _| {
                if id == failing_id {
                    Err(anyhow!("deadlock detected"))
                } else {
                    Ok(true)
                }
            });
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_cancel_subscription()
            .times(2)
            .returning(|id, _| Ok(cancelled_at_gateway(id)));

        let result = usecase(subscription_repo, gateway)
            .run(params(false))
            .await
            .unwrap();

        assert_eq!(result.scanned, 2);
        assert_eq!(result.failed_ids, vec![failing_id]);
        assert_eq!(result.cancelled_ids, vec![healthy_id]);
    }

    #[tokio::test]
    async fn subscription_activated_since_scan_is_skipped() {
        let stale = created_row(90);
        let mut activated = stale.clone();
        activated.status = "ACTIVE".to_string();
        activated.version = 2;

        let mut subscription_repo = MockUserSubscriptionRepository::new();
        subscription_repo
            .expect_list_created_before()
            .returning(move |_, _| Ok(vec![stale.clone()]));
        subscription_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(activated.clone())));
        subscription_repo.expect_update_with_event().times(0);
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_subscription().times(0);

        let result = usecase(subscription_repo, gateway)
            .run(params(false))
            .await
            .unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.cancelled, 0);
    }

    #[tokio::test]
    async fn subscription_younger_than_cutoff_is_left_untouched() {
        let store = Arc::new(InMemoryStore::default());
        let gateway = Arc::new(FakeGateway::default());
        let fitness = plan(ServiceCategory::Fitness, 3);
        store.add_plan(fitness.clone());

        let mut stale = subscription_row(Uuid::new_v4(), &fitness, SubscriptionStatus::Created);
        stale.payment_status = "PENDING".to_string();
        stale.created_at = Utc::now() - Duration::minutes(90);
        let mut fresh = subscription_row(Uuid::new_v4(), &fitness, SubscriptionStatus::Created);
        fresh.payment_status = "PENDING".to_string();
        fresh.created_at = Utc::now() - Duration::minutes(10);
        store.add_subscription(stale.clone());
        store.add_subscription(fresh.clone());

        let subscriptions = Arc::new(SubscriptionUseCase::new(
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&store),
            Arc::clone(&gateway),
        ));
        let result = OrphanCleanupUseCase::new(Arc::clone(&store), subscriptions)
            .run(params(false))
            .await
            .unwrap();

        assert_eq!(result.scanned, 1);
        assert_eq!(result.cancelled_ids, vec![stale.id]);
        assert_eq!(store.subscription(stale.id).status, "CANCELLED");

        let untouched = store.subscription(fresh.id);
        assert_eq!(untouched.status, "CREATED");
        assert_eq!(untouched.version, 1);

        let events = store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscription_id, Some(stale.id));
        assert_eq!(events[0].metadata["reason"], "payment_failed");
        assert_eq!(gateway.calls().len(), 1);
    }
}
