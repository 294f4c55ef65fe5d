//! Core: configuration, handler state and the server process
//!
//! - [`Config`]: environment-driven configuration
//! - [`ServerState`]: state shared by handlers
//! - [`Server`]: wires store, reconciliation worker and HTTP API together

pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use config::Config;
pub use error::{Result, ServerError};
pub use server::Server;
pub use state::ServerState;
