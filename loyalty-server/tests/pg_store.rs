//! PostgreSQL store against a live database
//!
//! Run with `DATABASE_URI=postgres://... cargo test --test pg_store -- --ignored`.
//! Logins and order numbers are unique per run, so the database need not be empty.

use loyalty_server::db::RepoError;
use loyalty_server::{PgStore, Store};
use rust_decimal::Decimal;
use shared::OrderNumber;
use shared::models::{AccrualResult, OrderStatus};
use std::sync::atomic::{AtomicU64, Ordering};

static SEQ: AtomicU64 = AtomicU64::new(0);

async fn store() -> PgStore {
    let uri = std::env::var("DATABASE_URI").expect("DATABASE_URI must be set");
    PgStore::connect(&uri).await.unwrap()
}

fn unique() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    nanos / 1000 * 100 + SEQ.fetch_add(1, Ordering::Relaxed) % 100
}

/// Append the Luhn check digit to `payload`
fn order_number(payload: u64) -> OrderNumber {
    let digits = payload.to_string();
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    let check = (10 - sum % 10) % 10;
    OrderNumber::parse(&format!("{digits}{check}")).unwrap()
}

async fn user(store: &PgStore) -> i64 {
    store
        .create_user(&format!("user-{}", unique()), "hash")
        .await
        .unwrap()
        .id
}

fn processed(number: &OrderNumber, accrual: i64) -> AccrualResult {
    AccrualResult {
        number: number.to_string(),
        status: OrderStatus::Processed,
        accrual: Decimal::new(accrual, 0),
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URI)"]
async fn test_apply_accrual_credits_once() {
    let store = store().await;
    let user_id = user(&store).await;
    let number = order_number(unique());
    store.create_order(user_id, &number).await.unwrap();

    let owner = store.apply_accrual(&processed(&number, 500)).await.unwrap();
    assert_eq!(owner, user_id);
    assert_eq!(store.account(user_id).await.unwrap().current, Decimal::new(500, 0));

    // Terminal now; a repeated answer is refused and the balance is untouched
    let again = store.apply_accrual(&processed(&number, 500)).await;
    assert!(matches!(again, Err(RepoError::Conflict(_))));
    assert_eq!(store.account(user_id).await.unwrap().current, Decimal::new(500, 0));

    let orders = store.orders_by_user(user_id).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Processed);
    assert_eq!(orders[0].accrual, Decimal::new(500, 0));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URI)"]
async fn test_apply_accrual_unknown_order() {
    let store = store().await;
    let number = order_number(unique());
    let result = store.apply_accrual(&processed(&number, 10)).await;
    assert!(matches!(result, Err(RepoError::NotFound(_))));
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URI)"]
async fn test_withdraw_without_funds_leaves_no_trace() {
    let store = store().await;
    let user_id = user(&store).await;
    let spend = order_number(unique());

    let result = store.withdraw(user_id, &spend, Decimal::ONE).await;
    assert!(matches!(result, Err(RepoError::NotEnoughFunds)));

    let account = store.account(user_id).await.unwrap();
    assert_eq!(account.current, Decimal::ZERO);
    assert_eq!(account.withdrawn, Decimal::ZERO);
    assert!(store.withdrawals(user_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (DATABASE_URI)"]
async fn test_duplicate_withdrawal_rolls_back_debit() {
    let store = store().await;
    let user_id = user(&store).await;
    let earned = order_number(unique());
    store.create_order(user_id, &earned).await.unwrap();
    store.apply_accrual(&processed(&earned, 100)).await.unwrap();

    let spend = order_number(unique());
    store
        .withdraw(user_id, &spend, Decimal::new(30, 0))
        .await
        .unwrap();
    let again = store.withdraw(user_id, &spend, Decimal::new(30, 0)).await;
    assert!(matches!(again, Err(RepoError::Conflict(_))));

    let account = store.account(user_id).await.unwrap();
    assert_eq!(account.current, Decimal::new(70, 0));
    assert_eq!(account.withdrawn, Decimal::new(30, 0));

    let withdrawals = store.withdrawals(user_id).await.unwrap();
    assert_eq!(withdrawals.len(), 1);
    assert_eq!(withdrawals[0].order, spend.as_str());
    assert_eq!(withdrawals[0].sum, Decimal::new(30, 0));
}
