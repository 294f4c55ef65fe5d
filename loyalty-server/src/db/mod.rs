//! Storage layer
//!
//! [`Store`] is the single persistence contract used by the HTTP handlers and
//! the reconciliation worker. Every method is its own unit of work: writes
//! that belong together (user + account, order status + credit, debit +
//! ledger entry) commit or roll back as one.
//!
//! - [`PgStore`]: PostgreSQL via sqlx
//! - [`MemoryStore`]: in-process, for development and tests

pub mod memory;
pub mod postgres;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use shared::models::{AccrualResult, Account, Order, User, Withdrawal};
use shared::{AppError, ErrorCode, OrderNumber};
use thiserror::Error;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Same owner submitted the same key again
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Key is taken by another owner, or the row is in a state that forbids the write
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not enough funds")]
    NotEnoughFunds,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepoError::NotFound("row".to_string()),
            other => RepoError::Database(other.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(what) => AppError::not_found(what),
            RepoError::AlreadyExists(msg) => AppError::with_message(ErrorCode::AlreadyExists, msg),
            RepoError::Conflict(msg) => AppError::conflict(msg),
            RepoError::NotEnoughFunds => AppError::new(ErrorCode::InsufficientFunds),
            RepoError::Database(msg) => {
                tracing::error!(error = %msg, "Store error");
                AppError::new(ErrorCode::DatabaseError)
            }
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence contract for users, orders and accounts
#[async_trait]
pub trait Store: Send + Sync {
    /// Create a user together with its empty account.
    ///
    /// Fails with [`RepoError::Conflict`] when the login is taken.
    async fn create_user(&self, login: &str, password_hash: &str) -> RepoResult<User>;

    async fn find_user_by_login(&self, login: &str) -> RepoResult<Option<User>>;

    async fn find_user_by_id(&self, id: i64) -> RepoResult<Option<User>>;

    /// Register a `NEW` order.
    ///
    /// [`RepoError::AlreadyExists`] when this user already uploaded the number,
    /// [`RepoError::Conflict`] when another user did.
    async fn create_order(&self, user_id: i64, number: &OrderNumber) -> RepoResult<()>;

    /// Orders of one user, newest first
    async fn orders_by_user(&self, user_id: i64) -> RepoResult<Vec<Order>>;

    /// Non-terminal orders ordered by id, paged by `limit`/`offset`.
    ///
    /// Returns [`RepoError::NotFound`] instead of an empty page.
    async fn unprocessed_orders(&self, limit: i64, offset: i64) -> RepoResult<Vec<Order>>;

    /// Store an accrual answer and credit the owner, atomically.
    ///
    /// The order is only updated while non-terminal ([`RepoError::Conflict`]
    /// otherwise); an unknown number is [`RepoError::NotFound`]. A strictly
    /// positive accrual is added to the owner's balance in the same
    /// transaction. Returns the owner's user id.
    async fn apply_accrual(&self, result: &AccrualResult) -> RepoResult<i64>;

    async fn account(&self, user_id: i64) -> RepoResult<Account>;

    /// Debit `sum` and append a withdrawal ledger entry, atomically.
    ///
    /// [`RepoError::NotEnoughFunds`] leaves both balance and ledger untouched;
    /// a number already used for a withdrawal is [`RepoError::Conflict`].
    async fn withdraw(&self, user_id: i64, number: &OrderNumber, sum: Decimal) -> RepoResult<()>;

    /// Withdrawals of one user, newest first
    async fn withdrawals(&self, user_id: i64) -> RepoResult<Vec<Withdrawal>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_repo_error_to_app_error() {
        let err: AppError = RepoError::NotEnoughFunds.into();
        assert_eq!(err.code, ErrorCode::InsufficientFunds);
        assert_eq!(err.http_status(), StatusCode::PAYMENT_REQUIRED);

        let err: AppError = RepoError::Database("connection reset".into()).into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        // Internal details stay in the log
        assert_eq!(err.message, "Database error");

        let err: AppError = RepoError::Conflict("taken".into()).into();
        assert_eq!(err.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = RepoError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, RepoError::NotFound(_)));
    }
}
