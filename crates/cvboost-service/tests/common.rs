//! Common test utilities for cvboost integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;
use serde_json::{json, Value};

use cvboost_core::{Account, OperationKind, PackCatalog, UserId};
use cvboost_service::stripe::{sign_payload, CheckoutSessionRequest, CreatedSession};
use cvboost_service::upstream::{PurchaseNotice, UpstreamError};
use cvboost_service::{
    create_router, ApiError, AppState, Notifier, OperationBackend, PaymentGateway, ServiceConfig,
    Services, StripeError, TokenVerifier,
};
use cvboost_store::{MemoryStore, Store};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const CANONICAL_ORIGIN: &str = "https://cvboost.app";
pub const PREVIEW_ORIGIN: &str = "https://preview.cvboost.app";

/// Accepts `test-token:<uuid>` and nothing else.
pub struct TestVerifier;

#[async_trait]
impl TokenVerifier for TestVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, ApiError> {
        token
            .strip_prefix("test-token:")
            .and_then(|id| id.parse().ok())
            .ok_or(ApiError::Unauthorized)
    }
}

/// Records checkout requests and answers with a predictable session.
#[derive(Default)]
pub struct FakeGateway {
    pub sessions: Mutex<Vec<CheckoutSessionRequest>>,
    pub customers: AtomicUsize,
}

impl FakeGateway {
    pub fn last_session(&self) -> CheckoutSessionRequest {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no checkout session opened")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_customer(
        &self,
        _user_id: &UserId,
        _email: Option<&str>,
    ) -> Result<String, StripeError> {
        let n = self.customers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("cus_test_{n}"))
    }

    async fn create_checkout_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedSession, StripeError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.push(request.clone());
        let id = format!("cs_test_{}", sessions.len());
        Ok(CreatedSession {
            url: format!("https://checkout.stripe.test/{id}"),
            id,
        })
    }
}

/// How the fake operation backend behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Reject,
    Hang,
}

/// Operation backend whose behavior tests can switch.
pub struct FakeOperations {
    pub behavior: Mutex<Behavior>,
    pub calls: AtomicUsize,
}

impl FakeOperations {
    fn new() -> Self {
        Self {
            behavior: Mutex::new(Behavior::Succeed),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationBackend for FakeOperations {
    async fn run(&self, kind: OperationKind, payload: &Value) -> Result<Value, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Succeed => Ok(json!({ "operation": kind.as_str(), "echo": payload })),
            Behavior::Fail => Err(UpstreamError::Status {
                status: 503,
                body: "unavailable".into(),
            }),
            Behavior::Reject => Err(UpstreamError::Rejected("unreadable resume".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
        }
    }
}

/// Keeps every purchase notice it is sent.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<PurchaseNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn purchase_completed(&self, notice: &PurchaseNotice) -> Result<(), UpstreamError> {
        self.notices.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Backing store, for direct assertions.
    pub store: Arc<MemoryStore>,
    pub payments: Arc<FakeGateway>,
    pub operations: Arc<FakeOperations>,
    pub notifier: Arc<RecordingNotifier>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store. Must run inside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test config.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_base_url: "http://localhost".into(),
            admin_api_key: Some(ADMIN_KEY.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            canonical_origin: CANONICAL_ORIGIN.into(),
            allowed_origins: vec![CANONICAL_ORIGIN.into(), PREVIEW_ORIGIN.into()],
            operation_timeout_seconds: 1,
            request_timeout_seconds: 30,
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let payments = Arc::new(FakeGateway::default());
        let operations = Arc::new(FakeOperations::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let services = Services {
            payments: Some(payments.clone()),
            operations: operations.clone(),
            notifier: notifier.clone(),
            verifier: Arc::new(TestVerifier),
        };

        let state = AppState::new(store.clone(), config, PackCatalog::default(), services);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            payments,
            operations,
            notifier,
            test_user_id: UserId::generate(),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        auth_header(self.test_user_id)
    }

    /// Register the test user through the API.
    pub async fn register(&self) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .json(&json!({}))
            .await
            .assert_status_ok();
    }

    /// Seed an account with an exact balance, bypassing the API.
    pub async fn seed_account(&self, user_id: UserId, balance: i64) {
        self.store
            .create_account(&Account::new(user_id, balance))
            .await
            .unwrap();
    }

    pub async fn balance_of(&self, user_id: UserId) -> i64 {
        self.store
            .get_account(&user_id)
            .await
            .unwrap()
            .expect("account exists")
            .balance
    }

    /// Create a coupon through the admin API and return it.
    pub async fn admin_create_coupon(&self, body: Value) -> Value {
        let response = self
            .server
            .post("/v1/admin/coupons")
            .add_header("x-admin-key", ADMIN_KEY)
            .json(&body)
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    /// Open a checkout as `user_id` and return what the processor was sent.
    pub async fn checkout(&self, user_id: UserId, body: Value) -> CheckoutSessionRequest {
        self.server
            .post("/v1/checkout")
            .add_header("authorization", auth_header(user_id))
            .json(&body)
            .await
            .assert_status_ok();
        self.payments.last_session()
    }

    /// Post a correctly signed Stripe event.
    pub async fn deliver_webhook(&self, body: &str) -> axum_test::TestResponse {
        let header = sign_payload(body, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap();
        self.server
            .post("/webhooks/stripe")
            .add_header("stripe-signature", header)
            .text(body)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn auth_header(user_id: UserId) -> String {
    format!("Bearer test-token:{user_id}")
}

/// Wait for the side-effect worker to catch up.
pub async fn settle_side_effects() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// A `checkout.session.completed` event built from the metadata a real
/// checkout request carried.
pub fn completed_event(request: &CheckoutSessionRequest, session_id: &str, amount: i64) -> String {
    let metadata: serde_json::Map<String, Value> = request
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_status": "paid",
            "amount_total": amount,
            "currency": request.currency,
            "client_reference_id": request.user_id.to_string(),
            "metadata": metadata
        }}
    })
    .to_string()
}
