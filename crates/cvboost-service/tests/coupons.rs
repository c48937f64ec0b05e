//! Coupon preview and administration integration tests.

mod common;

use axum::http::StatusCode;
use common::{auth_header, completed_event, settle_side_effects, TestHarness, ADMIN_KEY};
use cvboost_core::UserId;
use serde_json::json;

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn admin_endpoints_require_the_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/admin/coupons")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/admin/coupons")
        .add_header("x-admin-key", "wrong-key")
        .await
        .assert_status_unauthorized();

    harness
        .server
        .get("/v1/admin/coupons")
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn create_list_toggle_and_delete() {
    let harness = TestHarness::new();
    let coupon = harness
        .admin_create_coupon(json!({
            "code": "launch",
            "discount_type": "fixed",
            "discount_value": 300,
            "max_uses": 10
        }))
        .await;
    assert_eq!(coupon["code"], "LAUNCH");
    assert_eq!(coupon["active"], true);
    assert_eq!(coupon["current_uses"], 0);
    let id = coupon["id"].as_str().unwrap().to_string();

    let list: serde_json::Value = harness
        .server
        .get("/v1/admin/coupons")
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .json();
    assert_eq!(list.as_array().unwrap().len(), 1);

    let toggled: serde_json::Value = harness
        .server
        .post(&format!("/v1/admin/coupons/{id}/toggle"))
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .json();
    assert_eq!(toggled["active"], false);

    harness
        .server
        .delete(&format!("/v1/admin/coupons/{id}"))
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    harness
        .server
        .delete(&format!("/v1/admin/coupons/{id}"))
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn duplicate_codes_conflict() {
    let harness = TestHarness::new();
    let body = json!({ "code": "DUP", "discount_type": "percentage", "discount_value": 10 });
    harness.admin_create_coupon(body).await;

    harness
        .server
        .post("/v1/admin/coupons")
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({ "code": "dup", "discount_type": "fixed", "discount_value": 100 }))
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn out_of_range_definitions_are_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/admin/coupons")
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({ "code": "TOOMUCH", "discount_type": "percentage", "discount_value": 150 }))
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Preview
// ============================================================================

#[tokio::test]
async fn validate_previews_the_discounted_price() {
    let harness = TestHarness::new();
    harness.register().await;
    harness
        .admin_create_coupon(json!({
            "code": "FIVEOFF",
            "discount_type": "fixed",
            "discount_value": 500
        }))
        .await;

    let response = harness
        .server
        .post("/v1/coupons/validate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": "fiveoff", "packId": "25-credits" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "FIVEOFF");
    assert_eq!(body["listPriceCents"], 1900);
    assert_eq!(body["discountCents"], 500);
    assert_eq!(body["finalPriceCents"], 1400);
    assert_eq!(body["credits"], 25);
}

#[tokio::test]
async fn validate_reports_minimum_purchase() {
    let harness = TestHarness::new();
    harness.register().await;
    harness
        .admin_create_coupon(json!({
            "code": "BIGSPENDER",
            "discount_type": "percentage",
            "discount_value": 10,
            "min_purchase_cents": 1900
        }))
        .await;

    let response = harness
        .server
        .post("/v1/coupons/validate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": "BIGSPENDER", "packId": "10-credits" }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "below_minimum");
    assert_eq!(body["error"]["details"]["minimum"], 1900);
}

#[tokio::test]
async fn inactive_coupon_is_not_found() {
    let harness = TestHarness::new();
    harness.register().await;
    let coupon = harness
        .admin_create_coupon(json!({ "code": "PAUSED", "discount_type": "fixed", "discount_value": 100 }))
        .await;
    let id = coupon["id"].as_str().unwrap().to_string();
    harness
        .server
        .post(&format!("/v1/admin/coupons/{id}/toggle"))
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/coupons/validate")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "code": "PAUSED", "packId": "10-credits" }))
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "not_found");
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn paid_purchase_consumes_a_single_use_coupon() {
    let harness = TestHarness::new();
    harness.register().await;
    let coupon = harness
        .admin_create_coupon(json!({
            "code": "ONCE",
            "discount_type": "percentage",
            "discount_value": 20,
            "max_uses": 1
        }))
        .await;
    let id = coupon["id"].as_str().unwrap().to_string();

    let session = harness
        .checkout(
            harness.test_user_id,
            json!({ "packId": "10-credits", "couponCode": "ONCE" }),
        )
        .await;
    harness
        .deliver_webhook(&completed_event(&session, "cs_once", 720))
        .await
        .assert_status_ok();
    settle_side_effects().await;

    let redemptions: serde_json::Value = harness
        .server
        .get(&format!("/v1/admin/coupons/{id}/redemptions"))
        .add_header("x-admin-key", ADMIN_KEY)
        .await
        .json();
    let redemptions = redemptions.as_array().unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(redemptions[0]["discount_cents"], 180);
    assert_eq!(redemptions[0]["user_id"], harness.test_user_id.to_string());

    let other = UserId::generate();
    harness
        .server
        .post("/v1/accounts")
        .add_header("authorization", auth_header(other))
        .json(&json!({}))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/coupons/validate")
        .add_header("authorization", auth_header(other))
        .json(&json!({ "code": "ONCE", "packId": "10-credits" }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "exhausted");
}

#[tokio::test]
async fn coupon_cannot_be_reused_by_the_same_user() {
    let harness = TestHarness::new();
    harness.register().await;
    harness
        .admin_create_coupon(json!({ "code": "WELCOME", "discount_type": "fixed", "discount_value": 100 }))
        .await;

    let session = harness
        .checkout(
            harness.test_user_id,
            json!({ "packId": "10-credits", "couponCode": "WELCOME" }),
        )
        .await;
    harness
        .deliver_webhook(&completed_event(&session, "cs_welcome", 800))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/checkout")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "packId": "10-credits", "couponCode": "WELCOME" }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["reason"], "already_used");
}
