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
    infra::stripe_client::StripeClient,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook", post(stripe_webhook))
}

/// Stripe webhook receiver. The body must stay raw (not deserialized by the
/// framework) because the signature covers the exact bytes on the wire.
async fn stripe_webhook(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    StripeClient::verify_webhook_signature(
        &body,
        signature,
        app_state.config.stripe_webhook_secret.expose_secret(),
    )?;

    let payload: JsonValue = serde_json::from_str(&body)
        .map_err(|e| AppError::InvalidInput(format!("Invalid JSON payload: {}", e)))?;

    let event_id = payload["id"]
        .as_str()
        .ok_or_else(|| AppError::MissingField("id".into()))?
        .to_string();
    let event_type = payload["type"]
        .as_str()
        .ok_or_else(|| AppError::MissingField("type".into()))?
        .to_string();

    let headers_meta = json!({
        "livemode": payload["livemode"],
        "api_version": payload["api_version"],
    });

    let outcome = app_state
        .webhook_router
        .ingest(Provider::Stripe, &event_id, &event_type, payload, headers_meta)
        .await?;

    Ok(Json(json!({ "received": true, "outcome": outcome.as_str() })))
}
