use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
};
use secrecy::ExposeSecret;
use serde_json::{Value as JsonValue, json};

use crate::{
    adapters::http::app_state::AppState,
    app_error::{AppError, AppResult},
    domain::entities::webhook_event::Provider,
    infra::clerk_verifier,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(clerk_webhook))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> AppResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)
}

async fn clerk_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    let svix_id = header(&headers, "svix-id")?;
    let svix_timestamp = header(&headers, "svix-timestamp")?;
    let svix_signature = header(&headers, "svix-signature")?;

    clerk_verifier::verify_webhook_signature(
        &body,
        svix_id,
        svix_timestamp,
        svix_signature,
        app_state.config.clerk_webhook_secret.expose_secret(),
    )?;

    let payload: JsonValue = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid JSON payload: {}", e)))?;

    let event_type = payload["type"]
        .as_str()
        .ok_or_else(|| AppError::MissingField("type".into()))?
        .to_string();

    let headers_meta = json!({
        "svix_id": svix_id,
        "svix_timestamp": svix_timestamp,
    });

    // Clerk events carry no top-level id; the Svix message id identifies
    // the delivery for dedupe purposes.
    let outcome = app_state
        .webhook_router
        .ingest(Provider::Clerk, svix_id, &event_type, payload, headers_meta)
        .await?;

    Ok(Json(json!({ "received": true, "outcome": outcome.as_str() })))
}
