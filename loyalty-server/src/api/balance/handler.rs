//! Balance API Handlers

use axum::{
    Json,
    extract::{Extension, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use shared::models::{Account, WithdrawRequest};
use shared::{ApiResponse, AppError, AppResult, ErrorCode, OrderNumber};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::db::RepoError;

/// GET /api/user/balance
pub async fn balance(
    State(state): State<ServerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Json<Account>> {
    let account = state.store.account(current_user.id).await?;
    Ok(Json(account))
}

/// POST /api/user/balance/withdraw - spend points against a new order number
pub async fn withdraw(
    State(state): State<ServerState>,
    Extension(current_user): Extension<CurrentUser>,
    payload: Result<Json<WithdrawRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<()>>> {
    let Json(req) =
        payload.map_err(|e| AppError::invalid_request(format!("Malformed request: {e}")))?;

    if req.sum <= Decimal::ZERO {
        return Err(AppError::with_message(
            ErrorCode::InvalidAmount,
            "Withdrawal sum must be positive",
        )
        .with_detail("sum", req.sum.to_string()));
    }
    let number = OrderNumber::parse(&req.order)?;

    match state.store.withdraw(current_user.id, &number, req.sum).await {
        Ok(()) => {
            tracing::info!(
                user_id = current_user.id,
                order = %number,
                sum = %req.sum,
                "Points withdrawn"
            );
            Ok(Json(ApiResponse::ok()))
        }
        Err(RepoError::NotEnoughFunds) => {
            tracing::debug!(user_id = current_user.id, sum = %req.sum, "Withdrawal declined");
            Err(AppError::new(ErrorCode::InsufficientFunds))
        }
        Err(RepoError::Conflict(_)) => {
            Err(AppError::new(ErrorCode::WithdrawalExists).with_detail("order", number.as_str()))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /api/user/withdrawals - newest first, 204 when there are none
pub async fn withdrawals(
    State(state): State<ServerState>,
    Extension(current_user): Extension<CurrentUser>,
) -> AppResult<Response> {
    let withdrawals = state.store.withdrawals(current_user.id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    Ok(Json(withdrawals).into_response())
}
