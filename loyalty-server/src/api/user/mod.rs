//! Registration and login

mod handler;

use axum::{Router, routing::post};

use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/user/register", post(handler::register))
        .route("/api/user/login", post(handler::login))
}
