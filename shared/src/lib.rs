//! Shared types for the loyalty service
//!
//! Domain models, the Luhn-checked order number type and the unified
//! error/response types used by the server and its tests.

pub mod error;
pub mod models;
pub mod order_number;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

pub use error::{ApiResponse, AppError, AppResult, ErrorCategory, ErrorCode};
pub use order_number::OrderNumber;
