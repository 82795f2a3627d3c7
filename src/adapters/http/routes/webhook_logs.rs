use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    application::use_cases::event_log::EventLogFilter,
    domain::entities::webhook_event::{EventStatus, Provider},
};

#[derive(Deserialize)]
struct LogsQuery {
    event_type: Option<String>,
    provider: Option<String>,
    status: Option<String>,
    from: Option<String>,
    to: Option<String>,
    page: Option<i64>,
    per_page: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks", get(list_events))
        .route("/webhooks/{id}", get(get_event))
}

/// Accepts RFC 3339 timestamps or bare dates (interpreted as UTC midnight).
fn parse_timestamp(value: &str) -> AppResult<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default());
    }
    Err(AppError::InvalidInput(format!(
        "Invalid timestamp: {value}"
    )))
}

async fn list_events(
    State(app_state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> AppResult<impl IntoResponse> {
    let provider = match query.provider.as_deref() {
        Some(s) => Some(
            Provider::from_str(s)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown provider: {s}")))?,
        ),
        None => None,
    };
    let status = match query.status.as_deref() {
        Some(s) => Some(
            EventStatus::from_str(s)
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown status: {s}")))?,
        ),
        None => None,
    };
    let from = query.from.as_deref().map(parse_timestamp).transpose()?;
    let to = query.to.as_deref().map(parse_timestamp).transpose()?;

    let filter = EventLogFilter {
        event_type: query.event_type,
        provider,
        status,
        from,
        to,
    };
    let page = app_state
        .event_log
        .list(
            &filter,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;
    Ok(Json(page))
}

async fn get_event(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let event = app_state
        .event_log
        .get_by_id(id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(event))
}
