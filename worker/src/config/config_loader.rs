use anyhow::{Context, Result};
use backend::config::config_loader::load_razorpay;

use super::config_model::{Cleanup, Database, DotEnvyConfig, WorkerServer};

const DEFAULT_ORPHAN_TIMEOUT_MINUTES: i64 = 60;

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} is invalid"))
}

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let worker_server = WorkerServer {
        port: required("SERVER_PORT_WORKER")?
            .parse()
            .context("SERVER_PORT_WORKER is invalid")?,
        body_limit: required("SERVER_BODY_LIMIT")?
            .parse()
            .context("SERVER_BODY_LIMIT is invalid")?,
        timeout: required("SERVER_TIMEOUT")?
            .parse()
            .context("SERVER_TIMEOUT is invalid")?,
    };

    let database = Database {
        url: required("DATABASE_URL")?,
        max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(4),
    };

    let cleanup = Cleanup {
        internal_token: std::env::var("INTERNAL_CLEANUP_TOKEN").ok().and_then(|v| {
            let trimmed = v.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        }),
        orphan_timeout_minutes: std::env::var("ORPHAN_CLEANUP_TIMEOUT_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_ORPHAN_TIMEOUT_MINUTES),
    };

    Ok(DotEnvyConfig {
        worker_server,
        database,
        razorpay: load_razorpay()?,
        cleanup,
    })
}
