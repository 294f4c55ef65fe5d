//! User API Handlers

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use shared::models::{Credentials, User};
use shared::{ApiResponse, AppError, AppResult, ErrorCode};

use crate::auth::{self, AUTH_COOKIE};
use crate::core::ServerState;
use crate::db::RepoError;

/// POST /api/user/register - create an account and log in
pub async fn register(
    State(state): State<ServerState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Response> {
    let creds = credentials(payload)?;

    let hash = auth::hash_password(&creds.password).map_err(|e| {
        tracing::error!(error = %e, "Password hashing failed");
        AppError::internal("Password hashing failed")
    })?;

    let user = match state.store.create_user(creds.login.trim(), &hash).await {
        Ok(user) => user,
        Err(RepoError::Conflict(_)) => return Err(AppError::new(ErrorCode::LoginTaken)),
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id = user.id, login = %user.login, "User registered");
    session(&state, &user)
}

/// POST /api/user/login
pub async fn login(
    State(state): State<ServerState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<Response> {
    let creds = credentials(payload)?;

    let user = state
        .store
        .find_user_by_login(creds.login.trim())
        .await?
        .filter(|user| auth::verify_password(&creds.password, &user.password_hash))
        .ok_or_else(|| {
            tracing::info!(login = %creds.login, "Failed login attempt");
            AppError::invalid_credentials()
        })?;

    tracing::debug!(user_id = user.id, "User logged in");
    session(&state, &user)
}

fn credentials(payload: Result<Json<Credentials>, JsonRejection>) -> AppResult<Credentials> {
    let Json(creds) =
        payload.map_err(|e| AppError::invalid_request(format!("Malformed request: {e}")))?;
    if !creds.is_complete() {
        return Err(AppError::validation("Login and password are required"));
    }
    Ok(creds)
}

/// Issue a token as an `Authorization` cookie and header
fn session(state: &ServerState, user: &User) -> AppResult<Response> {
    let token = state.jwt.generate_token(user.id).map_err(|e| {
        tracing::error!(user_id = user.id, error = %e, "Token generation failed");
        AppError::internal("Token generation failed")
    })?;

    let cookie = format!(
        "{AUTH_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        state.jwt.lifetime_secs()
    );
    let bearer = format!("Bearer {token}");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|_| AppError::internal("Invalid cookie"))?,
    );
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&bearer).map_err(|_| AppError::internal("Invalid token"))?,
    );

    Ok((headers, Json(ApiResponse::ok())).into_response())
}
