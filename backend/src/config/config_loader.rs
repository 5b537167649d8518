use anyhow::{Context, Result};

use super::config_model::{AuthSecret, BackendServer, Database, DotEnvyConfig, Razorpay};

const DEFAULT_RAZORPAY_API_BASE_URL: &str = "https://api.razorpay.com/v1";

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} is invalid"))
}

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let backend_server = BackendServer {
        port: required("SERVER_PORT_BACKEND")?
            .parse()
            .context("SERVER_PORT_BACKEND is invalid")?,
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
            .unwrap_or(10),
    };

    let razorpay = load_razorpay()?;

    Ok(DotEnvyConfig {
        backend_server,
        database,
        razorpay,
    })
}

/// Shared with the worker, which talks to the same gateway account.
pub fn load_razorpay() -> Result<Razorpay> {
    dotenvy::dotenv().ok();

    Ok(Razorpay {
        api_base_url: std::env::var("RAZORPAY_API_BASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_RAZORPAY_API_BASE_URL.to_string()),
        key_id: required("RAZORPAY_KEY_ID")?,
        key_secret: required("RAZORPAY_KEY_SECRET")?,
        webhook_secret: required("RAZORPAY_WEBHOOK_SECRET")?,
    })
}

pub fn get_auth_secret() -> Result<AuthSecret> {
    dotenvy::dotenv().ok();

    Ok(AuthSecret {
        jwt_secret: required("AUTH_JWT_SECRET")?,
    })
}
