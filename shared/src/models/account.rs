//! Account Model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Points balance of a user
///
/// `current` never drops below zero; `withdrawn` only grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Account {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

/// Append-only ledger entry
///
/// `amount` is signed: withdrawals are stored negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct Operation {
    pub user_id: i64,
    pub order_number: String,
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl Operation {
    pub fn withdrawal(user_id: i64, order_number: impl Into<String>, sum: Decimal) -> Self {
        Self {
            user_id,
            order_number: order_number.into(),
            amount: -sum,
            processed_at: crate::util::now(),
        }
    }
}

/// Withdrawal as returned by `GET /api/user/withdrawals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Operation> for Withdrawal {
    fn from(op: Operation) -> Self {
        Self {
            order: op.order_number,
            sum: op.amount.abs(),
            processed_at: op.processed_at,
        }
    }
}

/// Body of `POST /api/user/balance/withdraw`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}
