//! Authentication: password hashing, JWT and the auth middleware

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtError, JwtService};
pub use middleware::require_auth;
pub use password::{hash_password, verify_password};

/// Cookie carrying the session token
pub const AUTH_COOKIE: &str = "Authorization";

/// User resolved by [`require_auth`], available as a request extension
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub login: String,
}
