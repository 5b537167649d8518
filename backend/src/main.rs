use std::sync::Arc;

use anyhow::Result;
use backend::{axum_http::http_serve, config::config_loader};
use billing::{
    infra::db::postgres::postgres_connection, payments::razorpay_client::RazorpayClient,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Backend exited with error: {:?}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    billing::observability::init_observability("backend")?;

    let dotenvy_env = config_loader::load()?;
    info!(razorpay = ?dotenvy_env.razorpay, "ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(
        &dotenvy_env.database.url,
        dotenvy_env.database.max_connections,
    )?;
    info!("Postgres connection has been established");

    let razorpay = dotenvy_env.razorpay.clone();
    let razorpay_client = RazorpayClient::new(
        razorpay.api_base_url,
        razorpay.key_id,
        razorpay.key_secret,
        razorpay.webhook_secret,
    );

    http_serve::start(
        Arc::new(dotenvy_env),
        Arc::new(postgres_pool),
        Arc::new(razorpay_client),
    )
    .await?;

    Ok(())
}
