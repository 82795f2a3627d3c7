use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::billing_provider::{
    BillingProviderPort, ProviderPrice, ProviderSubscription,
};
use crate::application::ports::notifications::{NotificationSender, NotificationTemplate};
use crate::application::use_cases::event_router::HandlerOutcome;
use crate::application::use_cases::identity::UserRepoTrait;
use crate::domain::entities::invoice::InvoiceStatus;
use crate::domain::entities::subscription::SubscriptionStatus;
use crate::domain::entities::subscription_plan::PlanInterval;
use crate::domain::entities::user::UserStatus;

// ============================================================================
// Repository Traits
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionProfile {
    pub id: uuid::Uuid,
    /// Provider subscription id.
    pub subscription_id: String,
    /// External identity id of the owner.
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub status: SubscriptionStatus,
    pub customer_id: Option<String>,
    /// Provider price id.
    pub plan_id: Option<String>,
    pub current_period_start: Option<NaiveDateTime>,
    pub current_period_end: Option<NaiveDateTime>,
    pub default_payment_method_id: Option<String>,
    pub previous_plan_id: Option<String>,
    pub plan_changed_at: Option<NaiveDateTime>,
    pub canceled_at: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
    pub cancellation_reason: Option<String>,
    pub cancel_requested_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub subscription_id: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub status: SubscriptionStatus,
    pub customer_id: Option<String>,
    pub plan_id: Option<String>,
    pub current_period_start: Option<NaiveDateTime>,
    pub current_period_end: Option<NaiveDateTime>,
    pub default_payment_method_id: Option<String>,
    pub previous_plan_id: Option<String>,
    pub plan_changed_at: Option<NaiveDateTime>,
    pub canceled_at: Option<NaiveDateTime>,
    pub cancel_at_period_end: bool,
}

/// Result of the plan migration transaction.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// Previously active rows that were cancelled in favor of the new one.
    pub superseded: Vec<SubscriptionProfile>,
}

#[async_trait]
pub trait SubscriptionRepoTrait: Send + Sync {
    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>>;

    /// All rows for the user, newest first.
    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>>;

    /// Active, not-yet-cancelled rows for the user.
    async fn list_active_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>>;

    /// The row the user is currently entitled through (active and not
    /// cancelled; a scheduled period-end cancel still counts).
    async fn find_current_for_user(&self, user_id: &str)
    -> AppResult<Option<SubscriptionProfile>>;

    /// Insert-or-update keyed on subscription_id.
    async fn upsert(&self, sub: SubscriptionUpsert) -> AppResult<SubscriptionProfile>;

    async fn mark_cancelled(
        &self,
        subscription_id: &str,
        canceled_at: NaiveDateTime,
        reason: Option<&str>,
    ) -> AppResult<()>;

    async fn set_cancel_flag(
        &self,
        subscription_id: &str,
        cancel: bool,
        reason: Option<&str>,
        requested_at: Option<NaiveDateTime>,
    ) -> AppResult<()>;

    /// Points rows stored under an email at the given external user id.
    async fn relink_user(&self, email: &str, user_id: &str) -> AppResult<u64>;

    /// Atomically activates `new_subscription_id` for the user and cancels
    /// every other active row, serialized per user. Fails with
    /// `DeactivatedUser` when the owner is blocked/banned/deleted, leaving
    /// all rows untouched.
    async fn migrate_to(
        &self,
        user_id: &str,
        new_subscription_id: &str,
        previous_plan_id: Option<&str>,
    ) -> AppResult<MigrationOutcome>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanProfile {
    pub id: uuid::Uuid,
    /// Provider price id.
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub interval: PlanInterval,
    pub active: bool,
    pub metadata: Option<JsonValue>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct PlanUpsert {
    pub plan_id: String,
    pub name: String,
    pub description: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub interval: PlanInterval,
    pub active: bool,
    pub metadata: Option<JsonValue>,
}

#[async_trait]
pub trait PlanRepoTrait: Send + Sync {
    async fn get_by_plan_id(&self, plan_id: &str) -> AppResult<Option<PlanProfile>>;

    async fn list_active(&self) -> AppResult<Vec<PlanProfile>>;

    async fn upsert(&self, plan: PlanUpsert) -> AppResult<PlanProfile>;

    async fn deactivate(&self, plan_id: &str) -> AppResult<()>;

    /// Deactivates every plan whose metadata references the product.
    async fn deactivate_by_product(&self, product_id: &str) -> AppResult<u64>;

    /// Deactivates plans absent from the given id set (catalog sync).
    async fn deactivate_missing(&self, keep_plan_ids: &[String]) -> AppResult<u64>;
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceProfile {
    pub id: uuid::Uuid,
    pub invoice_id: String,
    pub subscription_id: Option<String>,
    pub amount_paid_cents: Option<i64>,
    pub amount_due_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: InvoiceStatus,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub period_start: Option<NaiveDateTime>,
    pub period_end: Option<NaiveDateTime>,
    pub payment_intent: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct InvoiceUpsert {
    pub invoice_id: String,
    pub subscription_id: Option<String>,
    pub amount_paid_cents: Option<i64>,
    pub amount_due_cents: Option<i64>,
    pub currency: Option<String>,
    pub status: InvoiceStatus,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub period_start: Option<NaiveDateTime>,
    pub period_end: Option<NaiveDateTime>,
    pub payment_intent: Option<String>,
}

#[async_trait]
pub trait InvoiceRepoTrait: Send + Sync {
    async fn get_by_invoice_id(&self, invoice_id: &str) -> AppResult<Option<InvoiceProfile>>;

    /// Insert-or-update keyed on invoice_id; later events for the same
    /// invoice update status and amounts in place.
    async fn upsert(&self, invoice: InvoiceUpsert) -> AppResult<InvoiceProfile>;

    /// Invoices owned by the user (external id), newest first.
    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InvoiceProfile>>;

    async fn count_by_user(&self, user_id: &str) -> AppResult<i64>;
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct PlanVariant {
    pub plan_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: Option<JsonValue>,
}

/// Catalog entry: one product with its per-interval price variants.
#[derive(Debug, Clone, Serialize)]
pub struct PlanGroup {
    pub name: String,
    pub description: Option<String>,
    pub monthly: Option<PlanVariant>,
    pub yearly: Option<PlanVariant>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscription {
    pub user_status: UserStatus,
    pub subscription_status: Option<String>,
    pub subscription: Option<SubscriptionProfile>,
    pub plan: Option<PlanProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoicePage {
    pub items: Vec<InvoiceProfile>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationInfo {
    pub subscription_id: String,
    pub cancel_at_period_end: bool,
    /// End of the paid period, when the cancellation takes effect.
    pub effective_at: Option<NaiveDateTime>,
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct BillingUseCases {
    users: Arc<dyn UserRepoTrait>,
    subscriptions: Arc<dyn SubscriptionRepoTrait>,
    plans: Arc<dyn PlanRepoTrait>,
    invoices: Arc<dyn InvoiceRepoTrait>,
    provider: Arc<dyn BillingProviderPort>,
    notifier: Arc<dyn NotificationSender>,
}

impl BillingUseCases {
    pub fn new(
        users: Arc<dyn UserRepoTrait>,
        subscriptions: Arc<dyn SubscriptionRepoTrait>,
        plans: Arc<dyn PlanRepoTrait>,
        invoices: Arc<dyn InvoiceRepoTrait>,
        provider: Arc<dyn BillingProviderPort>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            users,
            subscriptions,
            plans,
            invoices,
            provider,
            notifier,
        }
    }

    // ------------------------------------------------------------------
    // Subscription lifecycle events
    // ------------------------------------------------------------------

    #[instrument(skip(self, payload))]
    pub async fn subscription_created(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        self.reconcile_subscription(payload, false).await
    }

    #[instrument(skip(self, payload))]
    pub async fn subscription_updated(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        self.reconcile_subscription(payload, true).await
    }

    async fn reconcile_subscription(
        &self,
        payload: &JsonValue,
        is_update: bool,
    ) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];

        // Rows created as a migration byproduct are reconciled by the
        // checkout handler; touching them here would race it.
        if object["metadata"]["isUpgrade"].as_str() == Some("true") {
            return Ok(HandlerOutcome::Ignored("plan migration byproduct".into()));
        }

        let sub_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;
        let customer_id = object["customer"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.customer".into()))?;

        let email = self
            .provider
            .get_customer_email(customer_id)
            .await?
            .ok_or_else(|| AppError::MissingField("customer email".into()))?;

        let owner = self.users.get_by_email(&email).await?;

        if let Some(user) = &owner
            && let Some(ext) = user.external_id.as_deref()
            && object["metadata"]["userId"].as_str() != Some(ext)
            && let Err(err) = self
                .provider
                .update_subscription_metadata(sub_id, &serde_json::json!({ "userId": ext }))
                .await
        {
            tracing::warn!(subscription_id = sub_id, error = ?err, "Metadata backfill failed");
        }

        // A deactivated owner never keeps a live subscription, whatever the
        // event says.
        if let Some(user) = &owner
            && user.status.is_deactivated()
        {
            if let Err(err) = self.provider.cancel_subscription(sub_id).await {
                tracing::warn!(subscription_id = sub_id, error = ?err, "Provider cancel failed");
            }
            self.subscriptions
                .mark_cancelled(sub_id, Utc::now().naive_utc(), Some("account deactivated"))
                .await?;
            tracing::info!(subscription_id = sub_id, "Cancelled subscription of deactivated user");
            return Ok(HandlerOutcome::Processed);
        }

        let mut upsert = subscription_upsert_from_object(
            object,
            owner.as_ref().and_then(|u| u.external_id.clone()),
            Some(email),
        );

        if is_update
            && let Some(prev_plan) = payload["data"]["previous_attributes"]["items"]["data"][0]
                ["price"]["id"]
                .as_str()
        {
            upsert.previous_plan_id = Some(prev_plan.to_string());
            upsert.plan_changed_at = Some(Utc::now().naive_utc());
        }

        let status = upsert.status;
        self.subscriptions.upsert(upsert).await?;

        if let Some(user) = &owner {
            self.users
                .set_subscription_mirror(user.id, Some(status.as_str()))
                .await?;
        }

        tracing::info!(
            subscription_id = sub_id,
            status = status.as_str(),
            "Subscription reconciled"
        );
        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn subscription_deleted(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let sub_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;

        let Some(row) = self.subscriptions.get_by_subscription_id(sub_id).await? else {
            return Ok(HandlerOutcome::Ignored(format!(
                "unknown subscription {sub_id}"
            )));
        };

        self.subscriptions
            .mark_cancelled(sub_id, Utc::now().naive_utc(), None)
            .await?;

        let owner = match row.user_id.as_deref() {
            Some(ext) => self.users.get_by_external_id(ext).await?,
            None => None,
        };
        if let Some(user) = &owner {
            self.users.set_subscription_mirror(user.id, None).await?;
        }

        // Deletions emitted while migrating plans are not real churn.
        let metadata = &object["metadata"];
        let is_migration = metadata["isUpgrade"].as_str() == Some("true")
            || metadata["newPlanId"].as_str().is_some();
        if !is_migration {
            let plan_name = match row.plan_id.as_deref() {
                Some(plan_id) => self
                    .plans
                    .get_by_plan_id(plan_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|p| p.name),
                None => None,
            };
            let recipient = owner.as_ref().and_then(|u| u.email.clone()).or(row.email);
            if let Some(to) = recipient
                && let Err(err) = self
                    .notifier
                    .send(&to, &NotificationTemplate::SubscriptionCancelled { plan_name })
                    .await
            {
                tracing::warn!(error = ?err, "Cancellation notification failed");
            }
        }

        tracing::info!(subscription_id = sub_id, "Subscription cancelled");
        Ok(HandlerOutcome::Processed)
    }

    // ------------------------------------------------------------------
    // Checkout / plan migration
    // ------------------------------------------------------------------

    #[instrument(skip(self, payload))]
    pub async fn checkout_completed(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let user_id = object["metadata"]["userId"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("metadata.userId".into()))?;
        let email = object["metadata"]["email"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("metadata.email".into()))?;
        let sub_id = object["subscription"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.subscription".into()))?;

        let provider_sub = self.provider.get_subscription(sub_id).await?;

        // Retried checkout deliveries after a finished migration.
        if let Some(existing) = self.subscriptions.get_by_subscription_id(sub_id).await?
            && existing.status == SubscriptionStatus::Active
            && existing.canceled_at.is_none()
        {
            return Ok(HandlerOutcome::AlreadyProcessed);
        }

        let previous = self.subscriptions.list_active_by_user(user_id).await?;
        let previous: Vec<_> = previous
            .into_iter()
            .filter(|row| row.subscription_id != sub_id)
            .collect();
        let previous_plan_id = previous.first().and_then(|row| row.plan_id.clone());

        self.subscriptions
            .upsert(subscription_upsert_from_provider(
                &provider_sub,
                Some(user_id.to_string()),
                Some(email.to_string()),
            ))
            .await?;

        let outcome = match self
            .subscriptions
            .migrate_to(user_id, sub_id, previous_plan_id.as_deref())
            .await
        {
            Ok(outcome) => outcome,
            Err(AppError::DeactivatedUser) => {
                // Never leave a paid subscription running for a
                // deactivated account.
                if let Err(err) = self.provider.cancel_subscription(sub_id).await {
                    tracing::warn!(
                        subscription_id = sub_id,
                        error = ?err,
                        "Provider cancel failed after aborted migration"
                    );
                }
                self.subscriptions
                    .mark_cancelled(sub_id, Utc::now().naive_utc(), Some("account deactivated"))
                    .await?;
                return Err(AppError::DeactivatedUser);
            }
            Err(err) => return Err(err),
        };

        // Committed. Everything below is cleanup that must not fail the event.
        let new_plan_id = provider_sub.price_id.clone();
        for old in &outcome.superseded {
            let tag = serde_json::json!({
                "isUpgrade": "true",
                "newPlanId": new_plan_id.clone().unwrap_or_default(),
            });
            if let Err(err) = self
                .provider
                .update_subscription_metadata(&old.subscription_id, &tag)
                .await
            {
                tracing::warn!(
                    subscription_id = %old.subscription_id,
                    error = ?err,
                    "Failed to tag superseded subscription"
                );
            }
            if let Err(err) = self.provider.cancel_subscription(&old.subscription_id).await {
                tracing::warn!(
                    subscription_id = %old.subscription_id,
                    error = ?err,
                    "Failed to cancel superseded subscription"
                );
            }
        }

        if !outcome.superseded.is_empty() {
            let previous_plan = match previous_plan_id.as_deref() {
                Some(id) => self.plan_name(id).await,
                None => None,
            };
            let new_plan = match new_plan_id.as_deref() {
                Some(id) => self.plan_name(id).await,
                None => None,
            };
            let template = NotificationTemplate::PlanChanged {
                previous_plan,
                new_plan: new_plan.unwrap_or_else(|| "your new plan".to_string()),
            };
            if let Err(err) = self.notifier.send(email, &template).await {
                tracing::warn!(error = ?err, "Plan-changed notification failed");
            }
        }

        tracing::info!(
            subscription_id = sub_id,
            user_id,
            superseded = outcome.superseded.len(),
            "Checkout reconciled"
        );
        Ok(HandlerOutcome::Processed)
    }

    async fn plan_name(&self, plan_id: &str) -> Option<String> {
        self.plans
            .get_by_plan_id(plan_id)
            .await
            .ok()
            .flatten()
            .map(|p| p.name)
    }

    // ------------------------------------------------------------------
    // Invoices
    // ------------------------------------------------------------------

    #[instrument(skip(self, payload))]
    pub async fn invoice_payment(
        &self,
        payload: &JsonValue,
        status: InvoiceStatus,
    ) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let invoice_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;

        let (user_id, discovered) = self.resolve_invoice_owner(object).await?;

        // Cache the discovered owner on the provider invoice so later
        // events resolve on the first strategy.
        if discovered
            && let Some(ext) = user_id.as_deref()
            && let Err(err) = self
                .provider
                .update_invoice_metadata(invoice_id, &serde_json::json!({ "userId": ext }))
                .await
        {
            tracing::warn!(invoice_id, error = ?err, "Invoice metadata write-back failed");
        }

        let email = object["customer_email"]
            .as_str()
            .or_else(|| object["customer_details"]["email"].as_str())
            .map(str::to_string);

        let line_period = &object["lines"]["data"][0]["period"];
        self.invoices
            .upsert(InvoiceUpsert {
                invoice_id: invoice_id.to_string(),
                subscription_id: object["subscription"].as_str().map(str::to_string),
                amount_paid_cents: object["amount_paid"].as_i64(),
                amount_due_cents: object["amount_due"].as_i64(),
                currency: object["currency"].as_str().map(str::to_string),
                status,
                user_id: user_id.clone(),
                email: email.clone(),
                period_start: epoch_to_naive(&line_period["start"])
                    .or_else(|| epoch_to_naive(&object["period_start"])),
                period_end: epoch_to_naive(&line_period["end"])
                    .or_else(|| epoch_to_naive(&object["period_end"])),
                payment_intent: object["payment_intent"].as_str().map(str::to_string),
            })
            .await?;

        if status == InvoiceStatus::Failed
            && let Some(to) = email
        {
            let template = NotificationTemplate::PaymentFailed {
                amount_due_cents: object["amount_due"].as_i64(),
                currency: object["currency"].as_str().map(str::to_string),
            };
            if let Err(err) = self.notifier.send(&to, &template).await {
                tracing::warn!(error = ?err, "Payment-failed notification failed");
            }
        }

        tracing::info!(invoice_id, status = status.as_str(), "Invoice recorded");
        Ok(HandlerOutcome::Processed)
    }

    /// Finds the external user id for an invoice. Returns the id and
    /// whether it had to be discovered (i.e. was not already stamped in
    /// the invoice metadata).
    async fn resolve_invoice_owner(
        &self,
        object: &JsonValue,
    ) -> AppResult<(Option<String>, bool)> {
        if let Some(ext) = object["metadata"]["userId"].as_str() {
            return Ok((Some(ext.to_string()), false));
        }

        if let Some(lines) = object["lines"]["data"].as_array() {
            for line in lines {
                if let Some(ext) = line["metadata"]["userId"].as_str() {
                    return Ok((Some(ext.to_string()), true));
                }
            }
        }

        let email = object["customer_email"]
            .as_str()
            .or_else(|| object["customer_details"]["email"].as_str());
        if let Some(addr) = email
            && let Some(user) = self.users.get_by_email(addr).await?
            && let Some(ext) = user.external_id
        {
            return Ok((Some(ext), true));
        }

        if let Some(sub_id) = object["subscription"].as_str()
            && let Some(row) = self.subscriptions.get_by_subscription_id(sub_id).await?
            && let Some(ext) = row.user_id
        {
            return Ok((Some(ext), true));
        }

        Ok((None, false))
    }

    // ------------------------------------------------------------------
    // Plan catalog events
    // ------------------------------------------------------------------

    #[instrument(skip(self, payload))]
    pub async fn product_updated(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let product_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;
        let name = object["name"].as_str().unwrap_or(product_id).to_string();
        let description = object["description"].as_str().map(str::to_string);

        if !object["active"].as_bool().unwrap_or(true) {
            let count = self.plans.deactivate_by_product(product_id).await?;
            tracing::info!(product_id, count, "Product deactivated");
            return Ok(HandlerOutcome::Processed);
        }

        let prices = self.provider.list_prices_for_product(product_id).await?;
        for price in prices {
            if price.active {
                self.plans
                    .upsert(plan_upsert_from_price(&price, &name, description.as_deref()))
                    .await?;
            } else {
                self.plans.deactivate(&price.id).await?;
            }
        }

        tracing::info!(product_id, "Product catalog updated");
        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn product_deleted(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let product_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;
        let count = self.plans.deactivate_by_product(product_id).await?;
        tracing::info!(product_id, count, "Product removed from catalog");
        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn price_updated(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let price_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;

        if !object["active"].as_bool().unwrap_or(true) {
            self.plans.deactivate(price_id).await?;
            return Ok(HandlerOutcome::Processed);
        }

        let product_id = object["product"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.product".into()))?;
        let product = self.provider.get_product(product_id).await?;

        let price = ProviderPrice {
            id: price_id.to_string(),
            product_id: product_id.to_string(),
            unit_amount_cents: object["unit_amount"].as_i64().unwrap_or(0),
            currency: object["currency"].as_str().unwrap_or("usd").to_string(),
            interval: object["recurring"]["interval"].as_str().map(str::to_string),
            active: true,
        };
        self.plans
            .upsert(plan_upsert_from_price(
                &price,
                &product.name,
                product.description.as_deref(),
            ))
            .await?;

        tracing::info!(price_id, "Price catalog updated");
        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn price_deleted(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let object = &payload["data"]["object"];
        let price_id = object["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.object.id".into()))?;
        self.plans.deactivate(price_id).await?;
        tracing::info!(price_id, "Price removed from catalog");
        Ok(HandlerOutcome::Processed)
    }

    // ------------------------------------------------------------------
    // User-facing operations
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn cancel_subscription(
        &self,
        user_id: &str,
        reason: Option<&str>,
    ) -> AppResult<CancellationInfo> {
        let row = self
            .subscriptions
            .find_current_for_user(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if row.cancel_at_period_end {
            return Err(AppError::InvalidInput(
                "Cancellation is already scheduled".into(),
            ));
        }

        let updated = self
            .provider
            .set_cancel_at_period_end(&row.subscription_id, true, reason)
            .await?;

        self.subscriptions
            .set_cancel_flag(
                &row.subscription_id,
                true,
                reason,
                Some(Utc::now().naive_utc()),
            )
            .await?;

        let effective_at = updated
            .current_period_end
            .map(|t| t.naive_utc())
            .or(row.current_period_end);

        if let Some(to) = row.email.as_deref() {
            let template = NotificationTemplate::CancelScheduled {
                period_end: effective_at.map(|t| t.format("%Y-%m-%d").to_string()),
            };
            if let Err(err) = self.notifier.send(to, &template).await {
                tracing::warn!(error = ?err, "Cancel-scheduled notification failed");
            }
        }

        tracing::info!(subscription_id = %row.subscription_id, user_id, "Cancellation scheduled");
        Ok(CancellationInfo {
            subscription_id: row.subscription_id,
            cancel_at_period_end: true,
            effective_at,
        })
    }

    #[instrument(skip(self))]
    pub async fn revert_cancellation(&self, user_id: &str) -> AppResult<CancellationInfo> {
        let row = self
            .subscriptions
            .find_current_for_user(user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !row.cancel_at_period_end {
            return Err(AppError::InvalidInput("No cancellation scheduled".into()));
        }

        self.provider
            .set_cancel_at_period_end(&row.subscription_id, false, None)
            .await?;

        self.subscriptions
            .set_cancel_flag(&row.subscription_id, false, None, None)
            .await?;

        if let Some(to) = row.email.as_deref()
            && let Err(err) = self
                .notifier
                .send(to, &NotificationTemplate::CancelReverted)
                .await
        {
            tracing::warn!(error = ?err, "Cancel-reverted notification failed");
        }

        tracing::info!(subscription_id = %row.subscription_id, user_id, "Cancellation reverted");
        Ok(CancellationInfo {
            subscription_id: row.subscription_id,
            cancel_at_period_end: false,
            effective_at: None,
        })
    }

    #[instrument(skip(self))]
    pub async fn current_subscription(&self, user_id: &str) -> AppResult<CurrentSubscription> {
        let user = self
            .users
            .get_by_external_id(user_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let subscription = self.subscriptions.find_current_for_user(user_id).await?;

        // Heal a stale denormalized mirror.
        let live_status = subscription.as_ref().map(|row| row.status.as_str());
        if user.subscription_status.as_deref() != live_status {
            self.users
                .set_subscription_mirror(user.id, live_status)
                .await?;
        }

        let plan = match subscription.as_ref().and_then(|row| row.plan_id.as_deref()) {
            Some(plan_id) => self.plans.get_by_plan_id(plan_id).await?,
            None => None,
        };

        Ok(CurrentSubscription {
            user_status: user.status,
            subscription_status: live_status.map(str::to_string),
            subscription,
            plan,
        })
    }

    #[instrument(skip(self))]
    pub async fn subscription_history(
        &self,
        user_id: &str,
    ) -> AppResult<Vec<SubscriptionProfile>> {
        self.subscriptions.list_by_user(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn payment_history(
        &self,
        user_id: &str,
        page: i64,
        per_page: i64,
    ) -> AppResult<InvoicePage> {
        let per_page = per_page.clamp(1, 100);
        let page = page.max(1);
        let items = self
            .invoices
            .list_by_user(user_id, per_page, (page - 1) * per_page)
            .await?;
        let total = self.invoices.count_by_user(user_id).await?;
        Ok(InvoicePage {
            items,
            total,
            page,
            per_page,
        })
    }

    // ------------------------------------------------------------------
    // Plan catalog endpoint
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn plan_catalog(&self) -> AppResult<Vec<PlanGroup>> {
        let mut plans = self.plans.list_active().await?;
        if plans.is_empty() {
            self.sync_catalog().await?;
            plans = self.plans.list_active().await?;
        }

        let mut groups: BTreeMap<String, PlanGroup> = BTreeMap::new();
        for plan in plans {
            if plan.amount_cents <= 0 {
                continue;
            }
            let group = groups.entry(plan.name.clone()).or_insert_with(|| PlanGroup {
                name: plan.name.clone(),
                description: plan.description.clone(),
                monthly: None,
                yearly: None,
            });
            let variant = PlanVariant {
                plan_id: plan.plan_id,
                amount_cents: plan.amount_cents,
                currency: plan.currency,
                metadata: plan.metadata,
            };
            match plan.interval {
                PlanInterval::Month => group.monthly = Some(variant),
                PlanInterval::Year => group.yearly = Some(variant),
                PlanInterval::OneTime => {}
            }
        }

        let mut out: Vec<PlanGroup> = groups
            .into_values()
            .filter(|g| g.monthly.is_some() || g.yearly.is_some())
            .collect();
        out.sort_by_key(|g| {
            g.monthly
                .as_ref()
                .or(g.yearly.as_ref())
                .map(|v| v.amount_cents)
                .unwrap_or(i64::MAX)
        });
        Ok(out)
    }

    /// Rebuilds the local catalog from the provider's active prices.
    async fn sync_catalog(&self) -> AppResult<()> {
        let prices = self.provider.list_active_prices().await?;
        let mut product_names: BTreeMap<String, (String, Option<String>)> = BTreeMap::new();
        let mut keep = Vec::with_capacity(prices.len());

        for price in &prices {
            if !product_names.contains_key(&price.product_id) {
                let product = self.provider.get_product(&price.product_id).await?;
                product_names.insert(price.product_id.clone(), (product.name, product.description));
            }
            let (name, description) = &product_names[&price.product_id];
            self.plans
                .upsert(plan_upsert_from_price(price, name, description.as_deref()))
                .await?;
            keep.push(price.id.clone());
        }

        let removed = self.plans.deactivate_missing(&keep).await?;
        tracing::info!(
            synced = keep.len(),
            removed,
            "Plan catalog synced from provider"
        );
        Ok(())
    }
}

// ============================================================================
// Payload mapping helpers
// ============================================================================

fn epoch_to_naive(value: &JsonValue) -> Option<NaiveDateTime> {
    value
        .as_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.naive_utc())
}

fn subscription_upsert_from_object(
    object: &JsonValue,
    user_id: Option<String>,
    email: Option<String>,
) -> SubscriptionUpsert {
    let status = object["status"]
        .as_str()
        .map(SubscriptionStatus::from_provider)
        .unwrap_or(SubscriptionStatus::Incomplete);
    SubscriptionUpsert {
        subscription_id: object["id"].as_str().unwrap_or_default().to_string(),
        user_id,
        email,
        status,
        customer_id: object["customer"].as_str().map(str::to_string),
        plan_id: object["items"]["data"][0]["price"]["id"]
            .as_str()
            .map(str::to_string),
        current_period_start: epoch_to_naive(&object["current_period_start"]),
        current_period_end: epoch_to_naive(&object["current_period_end"]),
        default_payment_method_id: object["default_payment_method"]
            .as_str()
            .map(str::to_string),
        previous_plan_id: None,
        plan_changed_at: None,
        canceled_at: epoch_to_naive(&object["canceled_at"]),
        cancel_at_period_end: object["cancel_at_period_end"].as_bool().unwrap_or(false),
    }
}

fn subscription_upsert_from_provider(
    sub: &ProviderSubscription,
    user_id: Option<String>,
    email: Option<String>,
) -> SubscriptionUpsert {
    SubscriptionUpsert {
        subscription_id: sub.id.clone(),
        user_id,
        email,
        status: SubscriptionStatus::from_provider(&sub.status),
        customer_id: sub.customer_id.clone(),
        plan_id: sub.price_id.clone(),
        current_period_start: sub.current_period_start.map(|t| t.naive_utc()),
        current_period_end: sub.current_period_end.map(|t| t.naive_utc()),
        default_payment_method_id: sub.default_payment_method_id.clone(),
        previous_plan_id: None,
        plan_changed_at: None,
        canceled_at: sub.canceled_at.map(|t| t.naive_utc()),
        cancel_at_period_end: sub.cancel_at_period_end,
    }
}

fn plan_upsert_from_price(
    price: &ProviderPrice,
    product_name: &str,
    product_description: Option<&str>,
) -> PlanUpsert {
    PlanUpsert {
        plan_id: price.id.clone(),
        name: product_name.to_string(),
        description: product_description.map(str::to_string),
        amount_cents: price.unit_amount_cents,
        currency: price.currency.clone(),
        interval: PlanInterval::from_provider(price.interval.as_deref()),
        active: price.active,
        metadata: Some(serde_json::json!({ "product_id": price.product_id })),
    }
}
