//! HTTP API
//!
//! | Module | Routes |
//! |--------|--------|
//! | [`health`] | `GET /health` |
//! | [`user`] | `POST /api/user/register`, `POST /api/user/login` |
//! | [`orders`] | `POST`/`GET /api/user/orders` |
//! | [`balance`] | `GET /api/user/balance`, `POST /api/user/balance/withdraw`, `GET /api/user/withdrawals` |
//!
//! Everything except health, register and login sits behind [`require_auth`].
//! Responses are gzip-compressed when the client accepts it; gzipped request
//! bodies are inflated before they reach the handlers.

pub mod balance;
pub mod health;
pub mod orders;
pub mod user;

use axum::{Router, middleware, routing::get};
use tower_http::{
    compression::CompressionLayer, decompression::RequestDecompressionLayer, trace::TraceLayer,
};

use crate::auth::require_auth;
use crate::core::ServerState;

/// Build the application router
pub fn build_router(state: ServerState) -> Router {
    let protected = Router::new()
        .merge(orders::router())
        .merge(balance::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(user::router())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(RequestDecompressionLayer::new())
        .with_state(state)
}
