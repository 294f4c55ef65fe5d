//! Data models
//!
//! Shared between the server, its store backends and the integration tests.
//! DB row types use `#[cfg_attr(feature = "db", derive(sqlx::FromRow))]`.
//! All IDs are `i64` (PostgreSQL BIGSERIAL).

pub mod account;
pub mod order;
pub mod user;

// Re-exports
pub use account::*;
pub use order::*;
pub use user::*;
