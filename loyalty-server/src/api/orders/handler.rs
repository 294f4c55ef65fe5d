//! Order API Handlers

use axum::{
    Json,
    extract::{Extension, State, rejection::StringRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::models::OrderResponse;
use shared::{ApiResponse, AppError, AppResult, ErrorCode, OrderNumber};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::db::RepoError;

/// POST /api/user/orders - upload an order number (plain text body)
///
/// 202 when accepted for processing, 200 when this user already uploaded it.
pub async fn upload(
    State(state): State<ServerState>,
    Extension(current_user): Extension<CurrentUser>,
    body: Result<String, StringRejection>,
) -> AppResult<Response> {
    let body = body.map_err(|e| AppError::invalid_request(format!("Malformed request: {e}")))?;
    let number = OrderNumber::parse(&body)?;

    match state.store.create_order(current_user.id, &number).await {
        Ok(()) => {
            tracing::info!(user_id = current_user.id, order = %number, "Order uploaded");
            Ok((
                StatusCode::ACCEPTED,
                Json(ApiResponse::ok_with_message("Order accepted for processing")),
            )
                .into_response())
        }
        Err(RepoError::AlreadyExists(_)) => Ok((
            StatusCode::OK,
            Json(ApiResponse::ok_with_message("Order already uploaded")),
        )
            .into_response()),
        Err(RepoError::Conflict(_)) => Err(AppError::new(ErrorCode::OrderOwnedByAnotherUser)
            .with_detail("order", number.as_str())),
        Err(e) => Err(e.into()),
    }
}

/// GET /api/user/orders - newest first, 204 when there are none
pub async fn list(
    State(state): State<ServerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Response> {
    let orders = state.store.orders_by_user(current_user.id).await?;
    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let orders: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(orders).into_response())
}
