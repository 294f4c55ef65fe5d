//! Authentication middleware

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use shared::AppError;

use crate::auth::{AUTH_COOKIE, CurrentUser, JwtError, JwtService};
use crate::core::ServerState;

/// Require a logged-in user.
///
/// Takes the JWT from the `Authorization` cookie, or from an
/// `Authorization: Bearer <token>` header. On success the resolved
/// [`CurrentUser`] is inserted into the request extensions.
///
/// | Failure | Status |
/// |---------|--------|
/// | no token | 401 NotAuthenticated |
/// | expired token | 401 TokenExpired |
/// | bad token, unknown user | 401 TokenInvalid |
pub async fn require_auth(
    State(state): State<ServerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = token_from_headers(req.headers()) else {
        tracing::debug!(uri = %req.uri(), "Request without credentials");
        return Err(AppError::not_authenticated());
    };

    let claims = state.jwt.validate_token(&token).map_err(|e| {
        tracing::warn!(uri = %req.uri(), error = %e, "Authentication failed");
        match e {
            JwtError::ExpiredToken => AppError::token_expired(),
            _ => AppError::invalid_token("Invalid token"),
        }
    })?;

    let user_id: i64 = claims
        .sub
        .parse()
        .map_err(|_| AppError::invalid_token("Invalid token subject"))?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(user_id, "Token for unknown user");
            AppError::invalid_token("Unknown user")
        })?;

    req.extensions_mut().insert(CurrentUser {
        id: user.id,
        login: user.login,
    });
    Ok(next.run(req).await)
}

fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == AUTH_COOKIE)
        .map(|(_, value)| value.trim_start_matches("Bearer ").to_string());

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(JwtService::extract_from_header)
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; Authorization=abc.def.ghi"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz"));
    }

    #[test]
    fn test_no_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(token_from_headers(&headers), None);
    }
}
