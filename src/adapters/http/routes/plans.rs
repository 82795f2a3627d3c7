use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::Serialize;

use crate::{
    adapters::http::app_state::AppState, app_error::AppResult,
    application::use_cases::billing::PlanGroup,
};

#[derive(Serialize)]
struct PlansResponse {
    items: Vec<PlanGroup>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_plans))
}

async fn list_plans(State(app_state): State<AppState>) -> AppResult<impl IntoResponse> {
    let items = app_state.billing_use_cases.plan_catalog().await?;
    Ok(Json(PlansResponse { items }))
}
