use axum::{
    Json, Router,
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
};

#[derive(Deserialize)]
struct PaymentsQuery {
    page: Option<i64>,
    per_page: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/history", get(history))
}

fn current_user_id(headers: &HeaderMap) -> AppResult<&str> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::MissingField("x-user-id".into()))
}

async fn history(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PaymentsQuery>,
) -> AppResult<impl IntoResponse> {
    let user_id = current_user_id(&headers)?;
    let page = app_state
        .billing_use_cases
        .payment_history(
            user_id,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;
    Ok(Json(page))
}
