use backend::config::config_model::Razorpay;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub razorpay: Razorpay,
    pub cleanup: Cleanup,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone)]
pub struct Cleanup {
    /// Bearer token for the internal endpoints. `None` disables them.
    pub internal_token: Option<String>,
    /// CREATED subscriptions older than this are treated as abandoned checkouts.
    pub orphan_timeout_minutes: i64,
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("internal_token_set", &self.internal_token.is_some())
            .field("orphan_timeout_minutes", &self.orphan_timeout_minutes)
            .finish()
    }
}
