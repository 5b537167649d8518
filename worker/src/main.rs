use std::sync::Arc;

use anyhow::Result;
use backend::usecases::subscriptions::SubscriptionUseCase;
use billing::{
    infra::db::{
        postgres::postgres_connection,
        repositories::{
            plans::PlanPostgres, subscription_events::SubscriptionEventPostgres,
            user_subscriptions::UserSubscriptionPostgres,
        },
    },
    payments::razorpay_client::RazorpayClient,
};
use tracing::{error, info};
use worker::{axum_http, config, usecases::orphan_cleanup::OrphanCleanupUseCase};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Worker exited with error: {:?}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    billing::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!(cleanup = ?dotenvy_env.cleanup, "ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");

    let db_pool_arc = Arc::new(postgres_pool);

    let razorpay = dotenvy_env.razorpay.clone();
    let razorpay_client = Arc::new(RazorpayClient::new(
        razorpay.api_base_url,
        razorpay.key_id,
        razorpay.key_secret,
        razorpay.webhook_secret,
    ));

    let subscription_repository = Arc::new(UserSubscriptionPostgres::new(Arc::clone(&db_pool_arc)));
    let subscriptions_usecase = Arc::new(SubscriptionUseCase::new(
        Arc::new(PlanPostgres::new(Arc::clone(&db_pool_arc))),
        Arc::clone(&subscription_repository),
        Arc::new(SubscriptionEventPostgres::new(Arc::clone(&db_pool_arc))),
        razorpay_client,
    ));
    let orphan_cleanup_usecase = Arc::new(OrphanCleanupUseCase::new(
        subscription_repository,
        subscriptions_usecase,
    ));

    axum_http::http_serve::start(dotenvy_env, orphan_cleanup_usecase).await
}
