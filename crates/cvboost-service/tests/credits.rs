//! Credit balance, history and catalog integration tests.

mod common;

use common::TestHarness;
use cvboost_core::CreditTransaction;
use cvboost_store::Store;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn get_balance_success() {
    let harness = TestHarness::new();
    harness.register().await;

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance"], 3);
}

#[tokio::test]
async fn get_balance_without_account_fails() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn get_balance_without_auth_fails() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn list_transactions_empty() {
    let harness = TestHarness::new();
    harness.register().await;

    let response = harness
        .server
        .get("/v1/credits/transactions")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!(body["transactions"].as_array().unwrap().is_empty());
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn list_transactions_pages_newest_first() {
    let harness = TestHarness::new();
    harness.register().await;

    for n in 1..=3 {
        let tx = CreditTransaction::usage(harness.test_user_id, n, format!("op {n}"));
        harness.store.append_transaction(&tx).await.unwrap();
    }

    let response = harness
        .server
        .get("/v1/credits/transactions?limit=2")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let transactions = body["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["credits"], -3);
    assert_eq!(transactions[0]["transaction_type"], "usage");
    assert_eq!(body["has_more"], true);

    let response = harness
        .server
        .get("/v1/credits/transactions?limit=2&offset=2")
        .add_header("authorization", harness.user_auth_header())
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], false);
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn packs_are_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/credits/packs").await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let packs = body["packs"].as_array().unwrap();
    assert_eq!(packs.len(), 3);
    assert_eq!(packs[0]["id"], "10-credits");
    assert_eq!(packs[0]["price_cents"], 900);
    assert_eq!(body["currency"], "usd");
}
