//! PostgreSQL store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use shared::OrderNumber;
use shared::models::{AccrualResult, Account, Operation, Order, OrderStatus, User, Withdrawal};
use sqlx::{PgConnection, PgPool};

use super::{RepoError, RepoResult, Store};

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    number: String,
    status: String,
    accrual: Decimal,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepoError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = OrderStatus::from_db(&row.status).ok_or_else(|| {
            RepoError::Database(format!("order {} has unknown status {}", row.id, row.status))
        })?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            number: row.number,
            status,
            accrual: row.accrual,
            uploaded_at: row.uploaded_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> RepoResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

/// [`Store`] backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and apply pending migrations
    pub async fn connect(database_uri: &str) -> RepoResult<Self> {
        let pool = PgPool::connect(database_uri).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RepoError::Database(format!("migration failed: {e}")))?;
        Ok(Self::new(pool))
    }
}

// ========== Transaction steps (run on a borrowed connection) ==========

/// Set status/accrual of a non-terminal order, returning its owner
async fn update_order(conn: &mut PgConnection, result: &AccrualResult) -> RepoResult<i64> {
    let owner: Option<(i64,)> = sqlx::query_as(
        "UPDATE orders SET status = $1, accrual = $2
         WHERE number = $3 AND status NOT IN ('PROCESSED', 'INVALID')
         RETURNING user_id",
    )
    .bind(result.status.as_str())
    .bind(result.accrual)
    .bind(&result.number)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((user_id,)) = owner {
        return Ok(user_id);
    }

    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM orders WHERE number = $1")
        .bind(&result.number)
        .fetch_optional(&mut *conn)
        .await?;
    match exists {
        Some(_) => Err(RepoError::Conflict(format!(
            "order {} is already in a terminal state",
            result.number
        ))),
        None => Err(RepoError::NotFound(format!("order {}", result.number))),
    }
}

async fn add_to_account(conn: &mut PgConnection, user_id: i64, amount: Decimal) -> RepoResult<()> {
    let updated = sqlx::query("UPDATE accounts SET balance = balance + $1 WHERE user_id = $2")
        .bind(amount)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(RepoError::NotFound(format!("account of user {user_id}")));
    }
    Ok(())
}

async fn save_operation(conn: &mut PgConnection, op: &Operation) -> RepoResult<()> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO operations (user_id, order_number, amount, processed_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (order_number) DO NOTHING
         RETURNING id",
    )
    .bind(op.user_id)
    .bind(&op.order_number)
    .bind(op.amount)
    .bind(op.processed_at)
    .fetch_optional(&mut *conn)
    .await?;
    if inserted.is_none() {
        return Err(RepoError::Conflict(format!(
            "withdrawal for order {} already exists",
            op.order_number
        )));
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, login: &str, password_hash: &str) -> RepoResult<User> {
        let mut tx = self.pool.begin().await?;

        let user: Option<User> = sqlx::query_as(
            "INSERT INTO users (login, password_hash, created_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (login) DO NOTHING
             RETURNING id, login, password_hash, created_at",
        )
        .bind(login)
        .bind(password_hash)
        .bind(shared::util::now())
        .fetch_optional(&mut *tx)
        .await?;
        let user = user.ok_or_else(|| RepoError::Conflict(format!("login {login} is taken")))?;

        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1)")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user)
    }

    async fn find_user_by_login(&self, login: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as(
            "SELECT id, login, password_hash, created_at FROM users WHERE login = $1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<User>> {
        let user =
            sqlx::query_as("SELECT id, login, password_hash, created_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(user)
    }

    async fn create_order(&self, user_id: i64, number: &OrderNumber) -> RepoResult<()> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO orders (user_id, number, status, accrual, uploaded_at)
             VALUES ($1, $2, 'NEW', 0, $3)
             ON CONFLICT (number) DO NOTHING
             RETURNING id",
        )
        .bind(user_id)
        .bind(number.as_str())
        .bind(shared::util::now())
        .fetch_optional(&self.pool)
        .await?;
        if inserted.is_some() {
            return Ok(());
        }

        let (owner,): (i64,) = sqlx::query_as("SELECT user_id FROM orders WHERE number = $1")
            .bind(number.as_str())
            .fetch_one(&self.pool)
            .await?;
        if owner == user_id {
            Err(RepoError::AlreadyExists(format!("order {number}")))
        } else {
            Err(RepoError::Conflict(format!(
                "order {number} was uploaded by another user"
            )))
        }
    }

    async fn orders_by_user(&self, user_id: i64) -> RepoResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, user_id, number, status, accrual, uploaded_at FROM orders
             WHERE user_id = $1
             ORDER BY uploaded_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        into_orders(rows)
    }

    async fn unprocessed_orders(&self, limit: i64, offset: i64) -> RepoResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(
            "SELECT id, user_id, number, status, accrual, uploaded_at FROM orders
             WHERE status IN ('NEW', 'PROCESSING')
             ORDER BY id
             LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(RepoError::NotFound(format!(
                "unprocessed orders at offset {offset}"
            )));
        }
        into_orders(rows)
    }

    async fn apply_accrual(&self, result: &AccrualResult) -> RepoResult<i64> {
        let mut tx = self.pool.begin().await?;

        let user_id = update_order(&mut tx, result).await?;
        if result.accrual > Decimal::ZERO {
            add_to_account(&mut tx, user_id, result.accrual).await?;
        }

        tx.commit().await?;
        Ok(user_id)
    }

    async fn account(&self, user_id: i64) -> RepoResult<Account> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT balance AS current, withdrawn FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        account.ok_or_else(|| RepoError::NotFound(format!("account of user {user_id}")))
    }

    async fn withdraw(&self, user_id: i64, number: &OrderNumber, sum: Decimal) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let balance: Option<(Decimal,)> = sqlx::query_as(
            "UPDATE accounts SET balance = balance - $1, withdrawn = withdrawn + $1
             WHERE user_id = $2
             RETURNING balance",
        )
        .bind(sum)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        match balance {
            None => return Err(RepoError::NotFound(format!("account of user {user_id}"))),
            // Dropping `tx` rolls the debit back
            Some((balance,)) if balance < Decimal::ZERO => return Err(RepoError::NotEnoughFunds),
            Some(_) => {}
        }

        save_operation(&mut tx, &Operation::withdrawal(user_id, number.as_str(), sum)).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn withdrawals(&self, user_id: i64) -> RepoResult<Vec<Withdrawal>> {
        let ops: Vec<Operation> = sqlx::query_as(
            "SELECT user_id, order_number, amount, processed_at FROM operations
             WHERE user_id = $1 AND amount < 0
             ORDER BY processed_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ops.into_iter().map(Withdrawal::from).collect())
    }
}
