use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::app_error::AppResult;

// ============================================================================
// Port Types - Provider-agnostic billing types
// ============================================================================

/// Subscription record as reported by the billing provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    /// Raw provider status string ("active", "past_due", ...).
    pub status: String,
    pub customer_id: Option<String>,
    pub price_id: Option<String>,
    pub product_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub default_payment_method_id: Option<String>,
    pub metadata: JsonValue,
}

/// Recurring price belonging to a provider product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPrice {
    pub id: String,
    pub product_id: String,
    pub unit_amount_cents: i64,
    pub currency: String,
    /// None for one-time prices.
    pub interval: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProduct {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub metadata: JsonValue,
}

// ============================================================================
// Port Trait
// ============================================================================

/// Outbound calls to the billing provider's API. The reconciler uses these
/// to enrich webhook payloads and to push local decisions (forced cancels,
/// metadata backfills) back to the provider.
#[async_trait]
pub trait BillingProviderPort: Send + Sync {
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<ProviderSubscription>;

    /// Cancels the subscription immediately at the provider.
    async fn cancel_subscription(&self, subscription_id: &str) -> AppResult<()>;

    /// Schedules or reverts a cancellation at the current period end.
    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
        reason: Option<&str>,
    ) -> AppResult<ProviderSubscription>;

    /// Merges the given keys into the subscription's provider metadata.
    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &JsonValue,
    ) -> AppResult<()>;

    /// Merges the given keys into the invoice's provider metadata.
    async fn update_invoice_metadata(
        &self,
        invoice_id: &str,
        metadata: &JsonValue,
    ) -> AppResult<()>;

    async fn get_customer_email(&self, customer_id: &str) -> AppResult<Option<String>>;

    /// All active recurring prices, for building the plan catalog.
    async fn list_active_prices(&self) -> AppResult<Vec<ProviderPrice>>;

    async fn list_prices_for_product(&self, product_id: &str) -> AppResult<Vec<ProviderPrice>>;

    async fn get_product(&self, product_id: &str) -> AppResult<ProviderProduct>;
}
