//! Test app state builder for HTTP-level integration testing.
//!
//! `TestAppStateBuilder` wires an `AppState` from the in-memory mocks so
//! endpoint tests run without Postgres or the provider APIs.

use std::sync::Arc;

use axum::http::HeaderValue;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::SecretString;
use sha2::Sha256;

use crate::{
    adapters::http::app_state::AppState,
    application::use_cases::{
        billing::BillingUseCases,
        event_log::EventLogUseCases,
        event_router::WebhookRouter,
        identity::IdentityUseCases,
        user_resolution::UserResolutionService,
    },
    infra::config::AppConfig,
    test_utils::{
        InMemoryInvoiceRepo, InMemoryPlanRepo, InMemorySubscriptionRepo, InMemoryUserRepo,
        InMemoryWebhookEventRepo, MockBillingProvider, RecordingNotifier,
    },
};

pub const TEST_STRIPE_WEBHOOK_SECRET: &str = "whsec_stripe_test_secret";
/// "whsec_" + base64("clerk-test-secret-key")
pub const TEST_CLERK_WEBHOOK_SECRET: &str = "whsec_Y2xlcmstdGVzdC1zZWNyZXQta2V5";

pub fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cors_origin: HeaderValue::from_static("http://localhost:3000"),
        database_url: "postgres://unused".to_string(),
        stripe_secret_key: SecretString::new("sk_test_123".into()),
        stripe_webhook_secret: SecretString::new(TEST_STRIPE_WEBHOOK_SECRET.into()),
        clerk_webhook_secret: SecretString::new(TEST_CLERK_WEBHOOK_SECRET.into()),
        resend_api_key: SecretString::new("re_test_123".into()),
        email_from: "billing@example.com".to_string(),
        enable_webhook_logging: true,
    }
}

pub struct TestAppStateBuilder {
    pub users: Arc<InMemoryUserRepo>,
    pub subscriptions: Arc<InMemorySubscriptionRepo>,
    pub plans: Arc<InMemoryPlanRepo>,
    pub invoices: Arc<InMemoryInvoiceRepo>,
    pub events: Arc<InMemoryWebhookEventRepo>,
    pub provider: Arc<MockBillingProvider>,
    pub notifier: Arc<RecordingNotifier>,
    logging_enabled: bool,
}

impl TestAppStateBuilder {
    pub fn new() -> Self {
        let users = Arc::new(InMemoryUserRepo::new());
        let subscriptions = Arc::new(InMemorySubscriptionRepo::with_users(users.clone()));
        Self {
            users,
            subscriptions,
            plans: Arc::new(InMemoryPlanRepo::new()),
            invoices: Arc::new(InMemoryInvoiceRepo::new()),
            events: Arc::new(InMemoryWebhookEventRepo::new()),
            provider: Arc::new(MockBillingProvider::new()),
            notifier: Arc::new(RecordingNotifier::new()),
            logging_enabled: true,
        }
    }

    pub fn without_event_logging(mut self) -> Self {
        self.logging_enabled = false;
        self
    }

    pub fn build(&self) -> AppState {
        let billing = Arc::new(BillingUseCases::new(
            self.users.clone(),
            self.subscriptions.clone(),
            self.plans.clone(),
            self.invoices.clone(),
            self.provider.clone(),
            self.notifier.clone(),
        ));
        let identity = Arc::new(IdentityUseCases::new(
            self.users.clone(),
            self.subscriptions.clone(),
            self.provider.clone(),
            self.notifier.clone(),
        ));
        let event_log = Arc::new(EventLogUseCases::new(
            self.events.clone(),
            self.logging_enabled,
        ));
        let resolution = Arc::new(UserResolutionService::new(
            self.users.clone(),
            self.subscriptions.clone(),
        ));
        let webhook_router = Arc::new(WebhookRouter::new(
            billing.clone(),
            identity,
            event_log.clone(),
            resolution,
        ));
        AppState {
            config: Arc::new(test_config()),
            webhook_router,
            billing_use_cases: billing,
            event_log,
        }
    }
}

impl Default for TestAppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Signature helpers
// ============================================================================

/// Builds a valid `stripe-signature` header for the given body.
pub fn stripe_signature_header(secret: &str, timestamp: i64, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{body}").as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={signature}")
}

/// Builds valid svix headers (id, timestamp, signature) for the given body.
pub fn clerk_signature_headers(
    secret: &str,
    msg_id: &str,
    timestamp: i64,
    body: &str,
) -> (String, String, String) {
    let key = base64::engine::general_purpose::STANDARD
        .decode(secret.trim_start_matches("whsec_"))
        .unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(format!("{msg_id}.{timestamp}.{body}").as_bytes());
    let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    (
        msg_id.to_string(),
        timestamp.to_string(),
        format!("v1,{signature}"),
    )
}
