use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::instrument;

use crate::app_error::{AppResult, is_retryable_error};
use crate::application::use_cases::billing::BillingUseCases;
use crate::application::use_cases::event_log::{EventLogUseCases, NewWebhookEvent, RecordOutcome};
use crate::application::use_cases::identity::IdentityUseCases;
use crate::application::use_cases::user_resolution::UserResolutionService;
use crate::domain::entities::invoice::InvoiceStatus;
use crate::domain::entities::webhook_event::Provider;

/// What a handler did with an event. Every variant is acknowledged with a
/// 2xx so the provider stops redelivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Processed,
    AlreadyProcessed,
    /// Recognized but deliberately skipped, with the reason.
    Ignored(String),
    /// Event type we do not handle. Unknown types are not errors.
    Unhandled,
}

impl HandlerOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerOutcome::Processed => "processed",
            HandlerOutcome::AlreadyProcessed => "already_processed",
            HandlerOutcome::Ignored(_) => "ignored",
            HandlerOutcome::Unhandled => "unhandled",
        }
    }
}

/// Front door for verified webhook events: logs the delivery, resolves the
/// user, dispatches to the matching handler and records the result.
#[derive(Clone)]
pub struct WebhookRouter {
    billing: Arc<BillingUseCases>,
    identity: Arc<IdentityUseCases>,
    event_log: Arc<EventLogUseCases>,
    resolution: Arc<UserResolutionService>,
}

impl WebhookRouter {
    pub fn new(
        billing: Arc<BillingUseCases>,
        identity: Arc<IdentityUseCases>,
        event_log: Arc<EventLogUseCases>,
        resolution: Arc<UserResolutionService>,
    ) -> Self {
        Self {
            billing,
            identity,
            event_log,
            resolution,
        }
    }

    #[instrument(skip(self, payload, headers_meta), fields(provider = provider.as_str()))]
    pub async fn ingest(
        &self,
        provider: Provider,
        event_id: &str,
        event_type: &str,
        payload: JsonValue,
        headers_meta: JsonValue,
    ) -> AppResult<HandlerOutcome> {
        let started = Instant::now();

        let (user_id, trail) = self.resolution.resolve(provider, &payload).await;

        let log_id = match self
            .event_log
            .record_received(NewWebhookEvent {
                provider,
                event_id: event_id.to_string(),
                event_type: event_type.to_string(),
                payload: payload.clone(),
                user_id,
                resolution: Some(trail.to_json()),
                metadata: headers_meta,
            })
            .await
        {
            RecordOutcome::Logged(id) => Some(id),
            RecordOutcome::Duplicate => return Ok(HandlerOutcome::AlreadyProcessed),
            RecordOutcome::Skipped => None,
        };

        if let Some(id) = log_id {
            self.event_log.mark_processing(id).await;
        }

        let result = self.dispatch(provider, event_type, &payload).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        match &result {
            Ok(outcome) => {
                if let Some(id) = log_id {
                    self.event_log
                        .mark_completed(id, elapsed_ms, outcome.as_str())
                        .await;
                }
                tracing::info!(
                    event_id,
                    event_type,
                    outcome = outcome.as_str(),
                    elapsed_ms,
                    "Webhook handled"
                );
            }
            Err(err) => {
                if let Some(id) = log_id {
                    self.event_log
                        .mark_failed(id, &err.to_string(), elapsed_ms)
                        .await;
                }
                tracing::error!(
                    event_id,
                    event_type,
                    error = ?err,
                    retryable = is_retryable_error(err),
                    "Webhook handling failed"
                );
            }
        }

        result
    }

    /// Static dispatch on (provider, event type).
    pub async fn dispatch(
        &self,
        provider: Provider,
        event_type: &str,
        payload: &JsonValue,
    ) -> AppResult<HandlerOutcome> {
        match (provider, event_type) {
            (Provider::Stripe, "customer.subscription.created") => {
                self.billing.subscription_created(payload).await
            }
            (Provider::Stripe, "customer.subscription.updated") => {
                self.billing.subscription_updated(payload).await
            }
            (Provider::Stripe, "customer.subscription.deleted") => {
                self.billing.subscription_deleted(payload).await
            }
            (Provider::Stripe, "checkout.session.completed") => {
                self.billing.checkout_completed(payload).await
            }
            (Provider::Stripe, "invoice.payment_succeeded") => {
                self.billing
                    .invoice_payment(payload, InvoiceStatus::Succeeded)
                    .await
            }
            (Provider::Stripe, "invoice.payment_failed") => {
                self.billing
                    .invoice_payment(payload, InvoiceStatus::Failed)
                    .await
            }
            (Provider::Stripe, "product.updated") => self.billing.product_updated(payload).await,
            (Provider::Stripe, "product.deleted") => self.billing.product_deleted(payload).await,
            (Provider::Stripe, "price.updated") => self.billing.price_updated(payload).await,
            (Provider::Stripe, "price.deleted") => self.billing.price_deleted(payload).await,
            (Provider::Clerk, "user.created") => self.identity.user_created(payload).await,
            (Provider::Clerk, "user.updated") => self.identity.user_updated(payload).await,
            (Provider::Clerk, "user.deleted") => self.identity.user_deleted(payload).await,
            _ => Ok(HandlerOutcome::Unhandled),
        }
    }
}
