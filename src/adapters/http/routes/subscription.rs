use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::use_cases::billing::SubscriptionProfile,
};

#[derive(Deserialize)]
struct CancelPayload {
    #[serde(rename = "cancellationReason")]
    cancellation_reason: Option<String>,
}

#[derive(Serialize)]
struct HistoryResponse {
    items: Vec<SubscriptionProfile>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(current))
        .route("/history", get(history))
        .route("/cancel", post(cancel))
        .route("/revert-cancel", post(revert_cancel))
}

fn current_user_id(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MissingField("x-user-id".into()))
}

async fn current(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = current_user_id(&headers)?;
    let current = app_state
        .billing_use_cases
        .current_subscription(user_id)
        .await?;
    Ok(Json(current))
}

async fn history(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = current_user_id(&headers)?;
    let items = app_state
        .billing_use_cases
        .subscription_history(user_id)
        .await?;
    Ok(Json(HistoryResponse { items }))
}

async fn cancel(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CancelPayload>,
) -> AppResult<impl IntoResponse> {
    let user_id = current_user_id(&headers)?;
    let info = app_state
        .billing_use_cases
        .cancel_subscription(user_id, payload.cancellation_reason.as_deref())
        .await?;
    Ok(Json(info))
}

async fn revert_cancel(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let user_id = current_user_id(&headers)?;
    let info = app_state
        .billing_use_cases
        .revert_cancellation(user_id)
        .await?;
    Ok(Json(info))
}
