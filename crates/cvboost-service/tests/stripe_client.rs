//! Stripe client tests against a mock Stripe API.

use cvboost_core::UserId;
use cvboost_service::stripe::CheckoutSessionRequest;
use cvboost_service::{PaymentGateway, StripeClient, StripeError};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_request(user_id: UserId) -> CheckoutSessionRequest {
    CheckoutSessionRequest {
        user_id,
        customer_id: None,
        product_name: "10 CVBoost credits".into(),
        amount_cents: 720,
        currency: "usd".into(),
        credits: 10,
        success_url: "https://cvboost.app/payment/success?session_id={CHECKOUT_SESSION_ID}".into(),
        cancel_url: "https://cvboost.app/pricing?checkout=cancelled".into(),
        metadata: vec![
            ("user_id".into(), user_id.to_string()),
            ("credits".into(), "10".into()),
            ("pack_id".into(), "10-credits".into()),
        ],
    }
}

#[tokio::test]
async fn checkout_session_is_form_encoded_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(header_exists("authorization"))
        .and(body_string_contains("unit_amount%5D=720"))
        .and(body_string_contains("metadata%5Bpack_id%5D=10-credits"))
        .and(body_string_contains("mode=payment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_a1",
            "url": "https://checkout.stripe.com/c/pay/cs_test_a1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StripeClient::new("sk_test_123", format!("{}/v1", server.uri())).unwrap();
    let gateway: &dyn PaymentGateway = &client;

    let session = gateway
        .create_checkout_session(&session_request(UserId::generate()))
        .await
        .unwrap();

    assert_eq!(session.id, "cs_test_a1");
    assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_test_a1");
}

#[tokio::test]
async fn customer_is_tagged_with_the_user_id() {
    let server = MockServer::start().await;
    let user_id = UserId::generate();
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .and(body_string_contains(user_id.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cus_abc",
            "email": "ada@example.com"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = StripeClient::new("sk_test_123", format!("{}/v1", server.uri())).unwrap();
    let customer_id = PaymentGateway::create_customer(&client, &user_id, Some("ada@example.com"))
        .await
        .unwrap();

    assert_eq!(customer_id, "cus_abc");
}

#[tokio::test]
async fn stripe_errors_are_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "type": "invalid_request_error",
                "message": "Amount must be at least 50 cents",
                "code": "amount_too_small"
            }
        })))
        .mount(&server)
        .await;

    let client = StripeClient::new("sk_test_123", format!("{}/v1", server.uri())).unwrap();
    let err = PaymentGateway::create_checkout_session(&client, &session_request(UserId::generate()))
        .await
        .unwrap_err();

    match err {
        StripeError::Api {
            error_type, code, ..
        } => {
            assert_eq!(error_type, "invalid_request_error");
            assert_eq!(code.as_deref(), Some("amount_too_small"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn session_without_url_is_an_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cs_no_url" })))
        .mount(&server)
        .await;

    let client = StripeClient::new("sk_test_123", format!("{}/v1", server.uri())).unwrap();
    let err = PaymentGateway::create_checkout_session(&client, &session_request(UserId::generate()))
        .await
        .unwrap_err();

    assert!(matches!(err, StripeError::InvalidResponse(_)));
}
