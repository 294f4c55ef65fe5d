//! Order reconciliation against the external accrual system
//!
//! ```text
//! Store ──► OrderSource ──mpsc──► Reconciler ──► DynamicRateLimiter
//!                                     │
//!                                     ├──► AccrualApi (HTTP)
//!                                     └──► Store::apply_accrual (one transaction)
//! ```
//!
//! - [`limiter`]: token bucket reconfigurable at runtime
//! - [`client`]: accrual HTTP client and the [`AccrualApi`] seam
//! - [`source`]: paginated producer of non-terminal orders
//! - [`worker`]: the reconciliation loop and its Run/Stop lifecycle

pub mod client;
pub mod limiter;
pub mod source;
pub mod worker;

pub use client::{AccrualApi, AccrualClient};
pub use limiter::{Cancelled, DynamicRateLimiter};
pub use source::OrderSource;
pub use worker::{Reconciler, WorkerConfig, WorkerState};

use std::time::Duration;
use thiserror::Error;

/// Outcome of one accrual query other than success
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccrualError {
    /// 429: back off and slow down
    #[error("accrual system is rate limiting requests")]
    RateLimited { retry_after: Option<Duration> },

    /// 204: nothing known about the order yet
    #[error("accrual system has no data for the order yet")]
    NoData,

    /// Network failure, unexpected status or malformed body
    #[error("accrual request failed: {0}")]
    Transient(String),
}

/// Reconciliation worker errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("invalid worker configuration: {0}")]
    Config(String),

    #[error("reconciliation worker is already running")]
    AlreadyRunning,
}
