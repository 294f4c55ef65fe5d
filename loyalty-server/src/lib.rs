//! Loyalty points server
//!
//! Users upload purchase order numbers, a background worker reconciles them
//! with the external accrual system, and credited points can be withdrawn
//! against new orders.
//!
//! # Modules
//!
//! - [`accrual`]: accrual client, rate limiter and reconciliation worker
//! - [`api`]: axum HTTP API
//! - [`auth`]: passwords, JWT, auth middleware
//! - [`core`]: configuration, state, server process
//! - [`db`]: storage contract with PostgreSQL and in-memory backends
//! - [`utils`]: logging

pub mod accrual;
pub mod api;
pub mod auth;
pub mod core;
pub mod db;
pub mod utils;

pub use accrual::{AccrualClient, DynamicRateLimiter, Reconciler, WorkerConfig, WorkerState};
pub use crate::core::{Config, Server, ServerState};
pub use db::{MemoryStore, PgStore, Store};
