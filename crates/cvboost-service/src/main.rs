//! cvboost service - HTTP API for the credit ledger.
//!
//! This is the main entry point for the cvboost service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cvboost_core::PackCatalog;
use cvboost_service::{create_router, AppState, ServiceConfig, Services, StoreBackend};
use cvboost_store::{MemoryStore, PgStore, Store};

/// Connection pool size for the Postgres backend.
const PG_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cvboost=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cvboost service");

    // Load configuration from environment
    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        store_backend = ?config.store_backend,
        stripe_configured = %config.stripe_api_key.is_some(),
        webhook_secret_configured = %config.stripe_webhook_secret.is_some(),
        operations_configured = %config.operations_api_url.is_some(),
        record_debits = %config.record_debits,
        "Service configuration loaded"
    );

    let catalog = match &config.catalog_path {
        Some(path) => {
            tracing::info!(path = %path, "Loading pack catalog");
            PackCatalog::from_file(path)?
        }
        None => PackCatalog::default(),
    };
    tracing::info!(
        version = catalog.version,
        packs = catalog.packs.len(),
        "Pack catalog ready"
    );

    let store = open_store(&config).await?;
    let services = Services::from_config(&config)?;

    let state = AppState::new(store, config.clone(), catalog, services);

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn open_store(
    config: &ServiceConfig,
) -> Result<Arc<dyn Store>, Box<dyn std::error::Error + Send + Sync>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store - balances are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL is required for the postgres backend")?;
            tracing::info!("Connecting to PostgreSQL");
            Ok(Arc::new(PgStore::connect(url, PG_MAX_CONNECTIONS).await?))
        }
        StoreBackend::Rocksdb => open_rocks(config),
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocks(
    config: &ServiceConfig,
) -> Result<Arc<dyn Store>, Box<dyn std::error::Error + Send + Sync>> {
    tracing::info!(path = %config.data_dir, "Opening RocksDB store");
    Ok(Arc::new(cvboost_store::RocksStore::open(&config.data_dir)?))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocks(
    _config: &ServiceConfig,
) -> Result<Arc<dyn Store>, Box<dyn std::error::Error + Send + Sync>> {
    Err("this build does not include the rocksdb backend".into())
}
