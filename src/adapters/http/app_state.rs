use std::sync::Arc;

use crate::{
    application::use_cases::billing::BillingUseCases,
    application::use_cases::event_log::EventLogUseCases,
    application::use_cases::event_router::WebhookRouter,
    infra::config::AppConfig,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub webhook_router: Arc<WebhookRouter>,
    pub billing_use_cases: Arc<BillingUseCases>,
    pub event_log: Arc<EventLogUseCases>,
}
