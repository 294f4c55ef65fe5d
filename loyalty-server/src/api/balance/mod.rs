//! Balance, withdrawals

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/user/balance", get(handler::balance))
        .route("/api/user/balance/withdraw", post(handler::withdraw))
        .route("/api/user/withdrawals", get(handler::withdrawals))
}
