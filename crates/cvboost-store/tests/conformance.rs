//! Behavior every `Store` backend must share.
//!
//! Each check is a plain async function over `&dyn Store`; the memory backend
//! always runs them, RocksDB runs them under `rocksdb-backend`, and Postgres
//! runs them when `DATABASE_URL` is set (`cargo test -- --ignored`).

use std::sync::Arc;

use chrono::{Duration, Utc};
use cvboost_core::{
    Account, Coupon, CouponRedemption, CreditTransaction, DiscountType, NewCoupon, Referral,
    ReferralStatus, TransactionId, UserId,
};
use cvboost_store::{CreditOutcome, MemoryStore, Store, StoreError};

async fn funded_account(store: &dyn Store, balance: i64) -> UserId {
    let user_id = UserId::generate();
    assert!(store
        .create_account(&Account::new(user_id, balance))
        .await
        .unwrap());
    user_id
}

fn coupon(code: &str, max_uses: Option<i64>) -> Coupon {
    NewCoupon {
        code: code.into(),
        discount_type: DiscountType::Percentage,
        discount_value: 20,
        max_uses,
        min_purchase_cents: None,
        expires_at: Some(Utc::now() + Duration::days(30)),
    }
    .build()
    .unwrap()
}

fn unique_code(prefix: &str) -> String {
    format!("{prefix}{}", &UserId::generate().to_string()[..8]).to_uppercase()
}

async fn account_lifecycle(store: &dyn Store) {
    let user_id = funded_account(store, 3).await;

    // Second create is a no-op.
    assert!(!store
        .create_account(&Account::new(user_id, 100))
        .await
        .unwrap());
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 3);

    store.set_customer_id(&user_id, "cus_123").await.unwrap();
    let account = store.get_account(&user_id).await.unwrap().unwrap();
    assert_eq!(account.customer_id.as_deref(), Some("cus_123"));

    assert!(store.mark_first_operation(&user_id).await.unwrap());
    assert!(!store.mark_first_operation(&user_id).await.unwrap());
    assert!(store
        .get_account(&user_id)
        .await
        .unwrap()
        .unwrap()
        .first_operation_at
        .is_some());

    let missing = UserId::generate();
    assert!(store.get_account(&missing).await.unwrap().is_none());
    assert!(matches!(
        store.set_customer_id(&missing, "cus_x").await,
        Err(StoreError::NotFound { .. })
    ));
}

async fn deduct_and_add(store: &dyn Store) {
    let user_id = funded_account(store, 3).await;

    assert_eq!(store.deduct(&user_id, 2).await.unwrap(), 1);
    match store.deduct(&user_id, 2).await {
        Err(StoreError::InsufficientCredits { balance, required }) => {
            assert_eq!(balance, 1);
            assert_eq!(required, 2);
        }
        other => panic!("expected insufficient credits, got {other:?}"),
    }
    // Failed deduct leaves the balance untouched.
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 1);

    assert_eq!(store.add(&user_id, 2).await.unwrap(), 3);
    assert!(matches!(
        store.deduct(&user_id, 0).await,
        Err(StoreError::InvalidAmount(_))
    ));
    assert!(matches!(
        store.add(&user_id, -1).await,
        Err(StoreError::InvalidAmount(_))
    ));
    assert!(matches!(
        store.deduct(&UserId::generate(), 1).await,
        Err(StoreError::NotFound { .. })
    ));
}

async fn concurrent_deducts(store: Arc<dyn Store>) {
    let user_id = funded_account(store.as_ref(), 10).await;

    let attempts = (0..25).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.deduct(&user_id, 1).await })
    });
    let results = futures::future::join_all(attempts).await;

    let succeeded = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();
    assert_eq!(succeeded, 10);
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 0);
}

async fn record_credit_is_idempotent(store: &dyn Store) {
    let user_id = funded_account(store, 0).await;
    let session = format!("cs_{}", TransactionId::generate());

    let tx = CreditTransaction::purchase(user_id, 10, 900, session.clone(), "10 credits".into());
    assert_eq!(
        store.record_credit(&tx).await.unwrap(),
        CreditOutcome::Credited { balance: 10 }
    );

    // A replay with a fresh transaction id but the same session changes nothing.
    let replay = CreditTransaction::purchase(user_id, 10, 900, session.clone(), "10 credits".into());
    assert_eq!(
        store.record_credit(&replay).await.unwrap(),
        CreditOutcome::Duplicate
    );
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 10);

    let stored = store
        .get_transaction_by_session(&session)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.id, tx.id);
    assert_eq!(store.list_transactions(&user_id, 10, 0).await.unwrap().len(), 1);
}

async fn record_credit_rejects_bad_input(store: &dyn Store) {
    let user_id = funded_account(store, 0).await;

    let zero = CreditTransaction::purchase(
        user_id,
        0,
        900,
        format!("cs_{}", TransactionId::generate()),
        "zero".into(),
    );
    assert!(matches!(
        store.record_credit(&zero).await,
        Err(StoreError::InvalidAmount(_))
    ));

    let mut no_session = CreditTransaction::purchase(user_id, 5, 900, "x", "no session".into());
    no_session.session_id = None;
    assert!(store.record_credit(&no_session).await.is_err());

    let orphan = CreditTransaction::purchase(
        UserId::generate(),
        5,
        900,
        format!("cs_{}", TransactionId::generate()),
        "orphan".into(),
    );
    assert!(matches!(
        store.record_credit(&orphan).await,
        Err(StoreError::NotFound { .. })
    ));
    // Nothing was written for the failed attempt.
    assert!(store
        .get_transaction_by_session(orphan.session_id.as_deref().unwrap())
        .await
        .unwrap()
        .is_none());
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 0);
}

async fn concurrent_record_credit(store: Arc<dyn Store>) {
    let user_id = funded_account(store.as_ref(), 0).await;
    let session = format!("cs_{}", TransactionId::generate());

    let deliveries = (0..8).map(|_| {
        let store = Arc::clone(&store);
        let tx = CreditTransaction::purchase(user_id, 25, 1900, session.clone(), "25".into());
        tokio::spawn(async move { store.record_credit(&tx).await })
    });
    let results = futures::future::join_all(deliveries).await;

    let credited = results
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(CreditOutcome::Credited { .. }))))
        .count();
    assert_eq!(credited, 1);
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 25);
}

async fn transactions_newest_first(store: &dyn Store) {
    let user_id = funded_account(store, 0).await;

    for i in 1..=3 {
        let tx = CreditTransaction::purchase(
            user_id,
            i,
            900,
            format!("cs_{}", TransactionId::generate()),
            format!("purchase {i}"),
        );
        store.record_credit(&tx).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    store
        .append_transaction(&CreditTransaction::usage(user_id, 1, "optimize_resume".into()))
        .await
        .unwrap();

    let all = store.list_transactions(&user_id, 10, 0).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].credits, -1);
    assert_eq!(all[1].description.as_deref(), Some("purchase 3"));
    assert_eq!(all[3].description.as_deref(), Some("purchase 1"));

    let page = store.list_transactions(&user_id, 2, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].description.as_deref(), Some("purchase 2"));

    // Appending never moves the balance.
    assert_eq!(store.get_account(&user_id).await.unwrap().unwrap().balance, 6);
}

async fn coupon_admin(store: &dyn Store) {
    let code = unique_code("ADM");
    let c = coupon(&code.to_lowercase(), None);
    store.create_coupon(&c).await.unwrap();

    let found = store
        .find_coupon_by_code(&code.to_lowercase())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, c.id);
    assert_eq!(found.code, code);

    let dup = coupon(&code, None);
    assert!(matches!(
        store.create_coupon(&dup).await,
        Err(StoreError::Conflict(_))
    ));

    let toggled = store.set_coupon_active(&c.id, false).await.unwrap();
    assert!(!toggled.active);
    assert!(!store.get_coupon(&c.id).await.unwrap().unwrap().active);
    assert!(store
        .list_coupons()
        .await
        .unwrap()
        .iter()
        .any(|listed| listed.id == c.id));

    store.delete_coupon(&c.id).await.unwrap();
    assert!(store.get_coupon(&c.id).await.unwrap().is_none());
    assert!(store.find_coupon_by_code(&code).await.unwrap().is_none());
    assert!(matches!(
        store.delete_coupon(&c.id).await,
        Err(StoreError::NotFound { .. })
    ));
}

async fn redemption_settlement(store: &dyn Store) {
    let c = coupon(&unique_code("ONCE"), Some(1));
    store.create_coupon(&c).await.unwrap();
    let first = UserId::generate();
    let second = UserId::generate();

    let redemption =
        CouponRedemption::new(c.id, c.code.clone(), first, TransactionId::generate(), 180);
    store.settle_redemption(&redemption).await.unwrap();
    assert!(store.has_redemption(&c.id, &first).await.unwrap());
    assert!(!store.has_redemption(&c.id, &second).await.unwrap());

    // Same user again.
    let again =
        CouponRedemption::new(c.id, c.code.clone(), first, TransactionId::generate(), 180);
    assert!(matches!(
        store.settle_redemption(&again).await,
        Err(StoreError::Conflict(_))
    ));

    // Different user, but the cap is reached.
    let other =
        CouponRedemption::new(c.id, c.code.clone(), second, TransactionId::generate(), 180);
    assert!(matches!(
        store.settle_redemption(&other).await,
        Err(StoreError::CouponExhausted)
    ));

    let stored = store.get_coupon(&c.id).await.unwrap().unwrap();
    assert_eq!(stored.current_uses, 1);
    let log = store.list_redemptions(&c.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].user_id, first);
    assert_eq!(log[0].discount_cents, 180);
}

async fn referral_lifecycle(store: &dyn Store) {
    let referrer = UserId::generate();
    let referred = UserId::generate();
    let referral = Referral::new(referrer, referred);

    assert!(store.create_referral(&referral).await.unwrap());
    assert!(!store
        .create_referral(&Referral::new(UserId::generate(), referred))
        .await
        .unwrap());

    let found = store.get_referral_for(&referred).await.unwrap().unwrap();
    assert_eq!(found.id, referral.id);
    assert_eq!(found.status, ReferralStatus::Pending);

    assert!(store.complete_referral(&referral.id).await.unwrap());
    assert!(!store.complete_referral(&referral.id).await.unwrap());

    store.mark_referral_rewarded(&referral.id).await.unwrap();
    let done = store.get_referral_for(&referred).await.unwrap().unwrap();
    assert_eq!(done.status, ReferralStatus::Completed);
    assert!(done.reward_granted);

    assert!(store.get_referral_for(&referrer).await.unwrap().is_none());
}

async fn run_all(store: Arc<dyn Store>) {
    account_lifecycle(store.as_ref()).await;
    deduct_and_add(store.as_ref()).await;
    concurrent_deducts(Arc::clone(&store)).await;
    record_credit_is_idempotent(store.as_ref()).await;
    record_credit_rejects_bad_input(store.as_ref()).await;
    concurrent_record_credit(Arc::clone(&store)).await;
    transactions_newest_first(store.as_ref()).await;
    coupon_admin(store.as_ref()).await;
    redemption_settlement(store.as_ref()).await;
    referral_lifecycle(store.as_ref()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_store_conformance() {
    run_all(Arc::new(MemoryStore::new())).await;
}

#[cfg(feature = "rocksdb-backend")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rocks_store_conformance() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = cvboost_store::RocksStore::open(dir.path()).unwrap();
    run_all(Arc::new(store)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL pointing at a disposable Postgres"]
async fn postgres_store_conformance() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
    let store = cvboost_store::PgStore::connect(&url, 5).await.unwrap();
    run_all(Arc::new(store)).await;
}
