//! Application state.

use std::sync::Arc;
use std::time::Duration;

use cvboost_core::PackCatalog;
use cvboost_store::Store;

use crate::auth::{JwksVerifier, TokenVerifier};
use crate::config::ServiceConfig;
use crate::ledger::{MeteredGuard, SideEffectQueue, SignatureConfig, WebhookReconciler};
use crate::stripe::{PaymentGateway, StripeClient};
use crate::upstream::{
    HttpNotifier, HttpOperationBackend, LogNotifier, Notifier, OperationBackend, UnconfiguredBackend,
};

/// Outbound collaborators. Built from config in production, substituted in tests.
#[derive(Clone)]
pub struct Services {
    /// Payment processor (absent when Stripe is not configured).
    pub payments: Option<Arc<dyn PaymentGateway>>,
    /// Backend for metered operations.
    pub operations: Arc<dyn OperationBackend>,
    /// Purchase notification sink.
    pub notifier: Arc<dyn Notifier>,
    /// Bearer token verifier.
    pub verifier: Arc<dyn TokenVerifier>,
}

impl Services {
    /// Build the production services described by `config`.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let payments: Option<Arc<dyn PaymentGateway>> = match &config.stripe_api_key {
            Some(key) => {
                let client = StripeClient::new(key, &config.stripe_api_base)?;
                tracing::info!("Stripe integration enabled");
                Some(Arc::new(client))
            }
            None => {
                tracing::warn!("Stripe not configured - purchases will not be available");
                None
            }
        };

        if config.stripe_webhook_secret.is_none() {
            tracing::warn!("Stripe webhook secret not configured - webhooks will be refused");
        }

        let operations: Arc<dyn OperationBackend> = match &config.operations_api_url {
            Some(url) => {
                tracing::info!(url = %url, "Operations backend configured");
                Arc::new(HttpOperationBackend::new(
                    url,
                    config.operations_api_key.clone(),
                    Duration::from_secs(config.operation_timeout_seconds),
                )?)
            }
            None => {
                tracing::warn!("Operations backend not configured - metered operations will fail and refund");
                Arc::new(UnconfiguredBackend)
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.notification_url {
            Some(url) => Arc::new(HttpNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };

        let verifier = Arc::new(JwksVerifier::new(&config.auth_base_url, &config.auth_audience)?);

        Ok(Self {
            payments,
            operations,
            notifier,
            verifier,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Pack catalog, fixed for the life of the process.
    pub catalog: Arc<PackCatalog>,

    /// Payment processor (optional).
    pub payments: Option<Arc<dyn PaymentGateway>>,

    /// Backend for metered operations.
    pub operations: Arc<dyn OperationBackend>,

    /// Bearer token verifier.
    pub verifier: Arc<dyn TokenVerifier>,

    /// Fire-and-forget work queue.
    pub side_effects: SideEffectQueue,
}

impl AppState {
    /// Assemble state and start the side-effect worker.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        catalog: PackCatalog,
        services: Services,
    ) -> Self {
        let side_effects = SideEffectQueue::spawn(store.clone(), services.notifier);

        Self {
            store,
            config,
            catalog: Arc::new(catalog),
            payments: services.payments,
            operations: services.operations,
            verifier: services.verifier,
            side_effects,
        }
    }

    /// Guard for metered operations.
    #[must_use]
    pub fn guard(&self) -> MeteredGuard {
        MeteredGuard::new(
            self.store.clone(),
            self.side_effects.clone(),
            Duration::from_secs(self.config.operation_timeout_seconds),
            self.config.record_debits,
        )
    }

    /// Reconciler for payment webhooks.
    #[must_use]
    pub fn reconciler(&self) -> WebhookReconciler {
        WebhookReconciler::new(
            self.store.clone(),
            self.catalog.clone(),
            self.side_effects.clone(),
            SignatureConfig {
                secret: self.config.stripe_webhook_secret.clone(),
                tolerance_seconds: self.config.webhook_tolerance_seconds,
            },
        )
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_payments(&self) -> bool {
        self.payments.is_some()
    }
}
