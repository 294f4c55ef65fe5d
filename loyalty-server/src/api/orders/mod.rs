//! Order upload and listing

mod handler;

use axum::{Router, routing::get};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/user/orders", get(handler::list).post(handler::upload))
}
