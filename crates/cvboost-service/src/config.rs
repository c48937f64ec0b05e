//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Which storage backend the binary opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps. Data is lost on restart.
    Memory,
    /// `RocksDB` under `DATA_DIR` (needs the `rocksdb-backend` feature).
    Rocksdb,
    /// PostgreSQL at `DATABASE_URL`.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::Rocksdb),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Storage backend (default: postgres when `DATABASE_URL` is set, else memory).
    pub store_backend: StoreBackend,

    /// PostgreSQL connection string.
    pub database_url: Option<String>,

    /// Path to `RocksDB` data directory (default: "/data/cvboost").
    pub data_dir: String,

    /// Identity provider base URL, also the expected JWT issuer.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "cvboost").
    pub auth_audience: String,

    /// Key required in `X-Admin-Key` for admin endpoints.
    pub admin_api_key: Option<String>,

    /// Stripe secret API key.
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret. Webhooks are refused without it.
    pub stripe_webhook_secret: Option<String>,

    /// Stripe API base URL (overridable for tests).
    pub stripe_api_base: String,

    /// Maximum age of a signed webhook, in seconds.
    pub webhook_tolerance_seconds: i64,

    /// Origin used for checkout redirects when the request origin is not allowed.
    pub canonical_origin: String,

    /// Origins allowed as checkout redirect targets.
    pub allowed_origins: Vec<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Upper bound on a metered operation's upstream call, in seconds.
    pub operation_timeout_seconds: u64,

    /// Credits granted to new accounts.
    pub signup_grant_credits: i64,

    /// Append a `usage` ledger entry for each kept debit.
    pub record_debits: bool,

    /// JSON pack catalog to load instead of the built-in one.
    pub catalog_path: Option<String>,

    /// Base URL of the resume/job-search backend.
    pub operations_api_url: Option<String>,

    /// Bearer key for the operations backend.
    pub operations_api_key: Option<String>,

    /// Endpoint that receives purchase notifications.
    pub notification_url: Option<String>,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (stripe_api_key, stripe_webhook_secret) = load_stripe_secrets();
        let database_url = std::env::var("DATABASE_URL").ok();

        let store_backend = std::env::var("STORE_BACKEND")
            .ok()
            .and_then(|s| match s.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring STORE_BACKEND");
                    None
                }
            })
            .unwrap_or(if database_url.is_some() {
                StoreBackend::Postgres
            } else {
                StoreBackend::Memory
            });

        let canonical_origin = env_or("CANONICAL_ORIGIN", &defaults.canonical_origin)
            .trim_end_matches('/')
            .to_string();

        Self {
            listen_addr: env_or("LISTEN_ADDR", &defaults.listen_addr),
            store_backend,
            database_url,
            data_dir: env_or("DATA_DIR", &defaults.data_dir),
            auth_base_url: env_or("AUTH_BASE_URL", &defaults.auth_base_url),
            auth_audience: env_or("AUTH_AUDIENCE", &defaults.auth_audience),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            stripe_api_key,
            stripe_webhook_secret,
            stripe_api_base: env_or("STRIPE_API_BASE", &defaults.stripe_api_base),
            webhook_tolerance_seconds: env_parse(
                "WEBHOOK_TOLERANCE_SECONDS",
                defaults.webhook_tolerance_seconds,
            ),
            allowed_origins: env_list("ALLOWED_ORIGINS", &canonical_origin),
            canonical_origin,
            cors_origins: env_list("CORS_ORIGINS", "*"),
            max_body_bytes: env_parse("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_parse(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
            operation_timeout_seconds: env_parse(
                "OPERATION_TIMEOUT_SECONDS",
                defaults.operation_timeout_seconds,
            ),
            signup_grant_credits: env_parse(
                "SIGNUP_GRANT_CREDITS",
                defaults.signup_grant_credits,
            ),
            record_debits: env_bool("RECORD_DEBITS"),
            catalog_path: std::env::var("CATALOG_PATH").ok(),
            operations_api_url: std::env::var("OPERATIONS_API_URL").ok(),
            operations_api_key: std::env::var("OPERATIONS_API_KEY").ok(),
            notification_url: std::env::var("NOTIFICATION_URL").ok(),
        }
    }
}

/// Load Stripe secrets from file or environment.
fn load_stripe_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [".secrets/stripe.json", "../.secrets/stripe.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<StripeSecrets>(path) {
            tracing::info!(path = %path, "Loaded Stripe secrets from file");
            return (Some(secrets.api_key), secrets.webhook_secret);
        }
    }

    tracing::debug!("Stripe secrets file not found, using environment variables");
    (
        std::env::var("STRIPE_API_KEY").ok(),
        std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            store_backend: StoreBackend::Memory,
            database_url: None,
            data_dir: "/data/cvboost".into(),
            auth_base_url: "https://auth.cvboost.app".into(),
            auth_audience: "cvboost".into(),
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com/v1".into(),
            webhook_tolerance_seconds: 300,
            canonical_origin: "https://cvboost.app".into(),
            allowed_origins: vec!["https://cvboost.app".into()],
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 90,
            operation_timeout_seconds: 60,
            signup_grant_credits: cvboost_core::DEFAULT_SIGNUP_GRANT_CREDITS,
            record_debits: false,
            catalog_path: None,
            operations_api_url: None,
            operations_api_key: None,
            notification_url: None,
        }
    }
}
