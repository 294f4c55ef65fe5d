//! In-memory store
//!
//! Used when no `DATABASE_URI` is configured in development, and by tests.
//! Each operation works on a copy of the state and swaps it in only on
//! success, which gives the same all-or-nothing behaviour as a transaction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::OrderNumber;
use shared::models::{AccrualResult, Account, Operation, Order, OrderStatus, User, Withdrawal};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{RepoError, RepoResult, Store};

/// Places where a test can make the next call fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Credit step of `apply_accrual`, after the order row was updated
    Credit,
    /// Next `unprocessed_orders` query
    UnprocessedOrders,
}

#[derive(Debug, Clone, Default)]
struct State {
    users: Vec<User>,
    accounts: HashMap<i64, Account>,
    orders: Vec<Order>,
    operations: Vec<Operation>,
    next_user_id: i64,
    next_order_id: i64,
}

impl State {
    fn order_mut(&mut self, number: &str) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.number == number)
    }

    fn account_mut(&mut self, user_id: i64) -> RepoResult<&mut Account> {
        self.accounts
            .get_mut(&user_id)
            .ok_or_else(|| RepoError::NotFound(format!("account of user {user_id}")))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    armed: Mutex<Vec<FailPoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next pass through `point` fail with a database error
    pub fn inject_failure(&self, point: FailPoint) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(point);
    }

    /// Look up an order by number, regardless of owner
    pub fn order(&self, number: &str) -> Option<Order> {
        self.lock().orders.iter().find(|o| o.number == number).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn trip(&self, point: FailPoint) -> RepoResult<()> {
        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        match armed.iter().position(|p| *p == point) {
            Some(idx) => {
                armed.remove(idx);
                Err(RepoError::Database(format!("injected failure at {point:?}")))
            }
            None => Ok(()),
        }
    }

    /// Run `f` against a copy of the state; keep the copy only if `f` succeeds
    fn transaction<T>(&self, f: impl FnOnce(&mut State) -> RepoResult<T>) -> RepoResult<T> {
        let mut guard = self.lock();
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        *guard = draft;
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> RepoResult<User> {
        self.transaction(|state| {
            if state.users.iter().any(|u| u.login == login) {
                return Err(RepoError::Conflict(format!("login {login} is taken")));
            }
            state.next_user_id += 1;
            let user = User {
                id: state.next_user_id,
                login: login.to_string(),
                password_hash: password_hash.to_string(),
                created_at: shared::util::now(),
            };
            state.users.push(user.clone());
            state.accounts.insert(user.id, Account::default());
            Ok(user)
        })
    }

    async fn find_user_by_login(&self, login: &str) -> RepoResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.login == login).cloned())
    }

    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<User>> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_order(&self, user_id: i64, number: &OrderNumber) -> RepoResult<()> {
        self.transaction(|state| {
            if let Some(existing) = state.orders.iter().find(|o| o.number == number.as_str()) {
                return if existing.user_id == user_id {
                    Err(RepoError::AlreadyExists(format!("order {number}")))
                } else {
                    Err(RepoError::Conflict(format!(
                        "order {number} was uploaded by another user"
                    )))
                };
            }
            state.next_order_id += 1;
            state.orders.push(Order {
                id: state.next_order_id,
                user_id,
                number: number.to_string(),
                status: OrderStatus::New,
                accrual: Decimal::ZERO,
                uploaded_at: shared::util::now(),
            });
            Ok(())
        })
    }

    async fn orders_by_user(&self, user_id: i64) -> RepoResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn unprocessed_orders(&self, limit: i64, offset: i64) -> RepoResult<Vec<Order>> {
        self.trip(FailPoint::UnprocessedOrders)?;
        let page: Vec<Order> = self
            .lock()
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect();
        if page.is_empty() {
            return Err(RepoError::NotFound(format!(
                "unprocessed orders at offset {offset}"
            )));
        }
        Ok(page)
    }

    async fn apply_accrual(&self, result: &AccrualResult) -> RepoResult<i64> {
        self.transaction(|state| {
            let order = state
                .order_mut(&result.number)
                .ok_or_else(|| RepoError::NotFound(format!("order {}", result.number)))?;
            if order.status.is_terminal() {
                return Err(RepoError::Conflict(format!(
                    "order {} is already in a terminal state",
                    result.number
                )));
            }
            order.status = result.status;
            order.accrual = result.accrual;
            let user_id = order.user_id;

            if result.accrual > Decimal::ZERO {
                self.trip(FailPoint::Credit)?;
                state.account_mut(user_id)?.current += result.accrual;
            }
            Ok(user_id)
        })
    }

    async fn account(&self, user_id: i64) -> RepoResult<Account> {
        self.lock()
            .accounts
            .get(&user_id)
            .copied()
            .ok_or_else(|| RepoError::NotFound(format!("account of user {user_id}")))
    }

    async fn withdraw(&self, user_id: i64, number: &OrderNumber, sum: Decimal) -> RepoResult<()> {
        self.transaction(|state| {
            let account = state.account_mut(user_id)?;
            account.current -= sum;
            account.withdrawn += sum;
            if account.current < Decimal::ZERO {
                return Err(RepoError::NotEnoughFunds);
            }

            if state
                .operations
                .iter()
                .any(|op| op.order_number == number.as_str())
            {
                return Err(RepoError::Conflict(format!(
                    "withdrawal for order {number} already exists"
                )));
            }
            state
                .operations
                .push(Operation::withdrawal(user_id, number.as_str(), sum));
            Ok(())
        })
    }

    async fn withdrawals(&self, user_id: i64) -> RepoResult<Vec<Withdrawal>> {
        let state = self.lock();
        // Ledger is append-only, so reverse insertion order is newest first
        Ok(state
            .operations
            .iter()
            .rev()
            .filter(|op| op.user_id == user_id && op.amount < Decimal::ZERO)
            .cloned()
            .map(Withdrawal::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    fn processed(raw: &str, accrual: Decimal) -> AccrualResult {
        AccrualResult {
            number: raw.to_string(),
            status: OrderStatus::Processed,
            accrual,
        }
    }

    async fn store_with_user() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let user = store.create_user("alice", "hash").await.unwrap();
        (store, user.id)
    }

    #[tokio::test]
    async fn test_create_user_creates_account() {
        let (store, user_id) = store_with_user().await;
        assert_eq!(store.account(user_id).await.unwrap(), Account::default());

        let err = store.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_order_is_idempotent_for_owner() {
        let (store, user_id) = store_with_user().await;
        store.create_order(user_id, &number("79927398713")).await.unwrap();

        let err = store
            .create_order(user_id, &number("79927398713"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::AlreadyExists(_)));

        let orders = store.orders_by_user(user_id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_create_order_conflicts_across_users() {
        let (store, alice) = store_with_user().await;
        let bob = store.create_user("bob", "hash").await.unwrap().id;

        store.create_order(bob, &number("79927398713")).await.unwrap();
        let err = store
            .create_order(alice, &number("79927398713"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
        assert_eq!(store.order("79927398713").unwrap().user_id, bob);
    }

    #[tokio::test]
    async fn test_apply_accrual_credits_owner() {
        let (store, user_id) = store_with_user().await;
        store
            .create_order(user_id, &number("4561261212345467"))
            .await
            .unwrap();

        let owner = store
            .apply_accrual(&processed("4561261212345467", Decimal::new(500, 0)))
            .await
            .unwrap();
        assert_eq!(owner, user_id);
        assert_eq!(
            store.account(user_id).await.unwrap().current,
            Decimal::new(500, 0)
        );

        // Terminal orders are never credited twice
        let err = store
            .apply_accrual(&processed("4561261212345467", Decimal::new(500, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
        assert_eq!(
            store.account(user_id).await.unwrap().current,
            Decimal::new(500, 0)
        );
    }

    #[tokio::test]
    async fn test_apply_accrual_rolls_back_on_credit_failure() {
        let (store, user_id) = store_with_user().await;
        store
            .create_order(user_id, &number("4561261212345467"))
            .await
            .unwrap();

        store.inject_failure(FailPoint::Credit);
        let err = store
            .apply_accrual(&processed("4561261212345467", Decimal::new(500, 0)))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Database(_)));

        let order = store.order("4561261212345467").unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.accrual, Decimal::ZERO);
        assert_eq!(store.account(user_id).await.unwrap().current, Decimal::ZERO);

        // The failure is one-shot; the retry goes through
        store
            .apply_accrual(&processed("4561261212345467", Decimal::new(500, 0)))
            .await
            .unwrap();
        assert_eq!(
            store.account(user_id).await.unwrap().current,
            Decimal::new(500, 0)
        );
    }

    #[tokio::test]
    async fn test_apply_accrual_unknown_order() {
        let (store, _) = store_with_user().await;
        let err = store
            .apply_accrual(&processed("79927398713", Decimal::ONE))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_withdraw_never_overdraws() {
        let (store, user_id) = store_with_user().await;
        store
            .create_order(user_id, &number("4561261212345467"))
            .await
            .unwrap();
        store
            .apply_accrual(&processed("4561261212345467", Decimal::new(100, 0)))
            .await
            .unwrap();

        let err = store
            .withdraw(user_id, &number("2377225624"), Decimal::new(10001, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotEnoughFunds));
        assert_eq!(
            store.account(user_id).await.unwrap(),
            Account {
                current: Decimal::new(100, 0),
                withdrawn: Decimal::ZERO,
            }
        );
        assert!(store.withdrawals(user_id).await.unwrap().is_empty());

        store
            .withdraw(user_id, &number("2377225624"), Decimal::new(40, 0))
            .await
            .unwrap();
        store
            .withdraw(user_id, &number("79927398713"), Decimal::new(60, 0))
            .await
            .unwrap();
        assert_eq!(
            store.account(user_id).await.unwrap(),
            Account {
                current: Decimal::ZERO,
                withdrawn: Decimal::new(100, 0),
            }
        );

        let history = store.withdrawals(user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].order, "79927398713");
        assert_eq!(history[1].sum, Decimal::new(40, 0));
    }

    #[tokio::test]
    async fn test_withdraw_rejects_reused_number() {
        let (store, user_id) = store_with_user().await;
        store
            .create_order(user_id, &number("4561261212345467"))
            .await
            .unwrap();
        store
            .apply_accrual(&processed("4561261212345467", Decimal::new(100, 0)))
            .await
            .unwrap();

        store
            .withdraw(user_id, &number("2377225624"), Decimal::new(10, 0))
            .await
            .unwrap();
        let err = store
            .withdraw(user_id, &number("2377225624"), Decimal::new(10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
        assert_eq!(
            store.account(user_id).await.unwrap().current,
            Decimal::new(90, 0)
        );
    }

    #[tokio::test]
    async fn test_unprocessed_orders_pages_and_reports_exhaustion() {
        let (store, user_id) = store_with_user().await;
        for raw in ["79927398713", "4561261212345467", "2377225624"] {
            store.create_order(user_id, &number(raw)).await.unwrap();
        }
        store
            .apply_accrual(&processed("79927398713", Decimal::ZERO))
            .await
            .unwrap();

        let page = store.unprocessed_orders(10, 0).await.unwrap();
        let numbers: Vec<_> = page.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, ["4561261212345467", "2377225624"]);

        let page = store.unprocessed_orders(1, 1).await.unwrap();
        assert_eq!(page[0].number, "2377225624");

        let err = store.unprocessed_orders(10, 2).await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }
}
