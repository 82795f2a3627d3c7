use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    adapters::{http::app_state::AppState, persistence::PostgresPersistence},
    application::{
        ports::{billing_provider::BillingProviderPort, notifications::NotificationSender},
        use_cases::{
            billing::{BillingUseCases, InvoiceRepoTrait, PlanRepoTrait, SubscriptionRepoTrait},
            event_log::{EventLogUseCases, WebhookEventRepoTrait},
            event_router::WebhookRouter,
            identity::{IdentityUseCases, UserRepoTrait},
            user_resolution::UserResolutionService,
        },
    },
    infra::{
        config::AppConfig, db::init_db, resend_notifier::ResendNotificationSender,
        stripe_client::StripeClient,
    },
};

pub async fn init_app_state() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env();

    let pool = init_db(&config.database_url).await?;
    let postgres_arc = Arc::new(PostgresPersistence::new(pool));

    let user_repo_arc = postgres_arc.clone() as Arc<dyn UserRepoTrait>;
    let subscription_repo_arc = postgres_arc.clone() as Arc<dyn SubscriptionRepoTrait>;
    let plan_repo_arc = postgres_arc.clone() as Arc<dyn PlanRepoTrait>;
    let invoice_repo_arc = postgres_arc.clone() as Arc<dyn InvoiceRepoTrait>;
    let event_repo_arc = postgres_arc.clone() as Arc<dyn WebhookEventRepoTrait>;

    let provider =
        Arc::new(StripeClient::new(config.stripe_secret_key.clone())) as Arc<dyn BillingProviderPort>;
    let notifier = Arc::new(ResendNotificationSender::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
    )) as Arc<dyn NotificationSender>;

    let billing_use_cases = Arc::new(BillingUseCases::new(
        user_repo_arc.clone(),
        subscription_repo_arc.clone(),
        plan_repo_arc,
        invoice_repo_arc,
        provider.clone(),
        notifier.clone(),
    ));

    let identity_use_cases = Arc::new(IdentityUseCases::new(
        user_repo_arc.clone(),
        subscription_repo_arc.clone(),
        provider,
        notifier,
    ));

    let event_log = Arc::new(EventLogUseCases::new(
        event_repo_arc,
        config.enable_webhook_logging,
    ));

    let resolution = Arc::new(UserResolutionService::new(
        user_repo_arc,
        subscription_repo_arc,
    ));

    let webhook_router = Arc::new(WebhookRouter::new(
        billing_use_cases.clone(),
        identity_use_cases,
        event_log.clone(),
        resolution,
    ));

    Ok(AppState {
        config: Arc::new(config),
        webhook_router,
        billing_use_cases,
        event_log,
    })
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "subsync=debug,tower_http=debug".into());

    // Console (pretty logs)
    let console_layer = fmt::layer()
        .with_target(false) // don’t show target (module path)
        .with_level(true) // show log level
        .pretty(); // human-friendly, with colors

    // File (structured JSON logs)
    let file = File::create("app.log").expect("cannot create log file");
    let json_layer = fmt::layer()
        .json()
        .with_writer(file)
        .with_current_span(true)
        .with_span_list(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .try_init()
        .ok();
}
