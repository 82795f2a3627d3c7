pub mod billing_webhooks;
pub mod identity_webhooks;
pub mod payments_history;
pub mod plans;
pub mod subscription;
pub mod webhook_logs;

use axum::Router;

use crate::adapters::http::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/payments", billing_webhooks::router())
        .nest("/auth", identity_webhooks::router())
        .nest("/plans", plans::router())
        .nest("/user/subscription", subscription::router())
        .nest("/user/payments", payments_history::router())
        .nest("/logs", webhook_logs::router())
}
