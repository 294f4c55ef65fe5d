//! Shared handler state

use std::sync::Arc;

use crate::auth::JwtService;
use crate::db::Store;

/// State handed to every handler and middleware
#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub jwt: Arc<JwtService>,
}

impl ServerState {
    pub fn new(store: Arc<dyn Store>, jwt: JwtService) -> Self {
        Self {
            store,
            jwt: Arc::new(jwt),
        }
    }
}
