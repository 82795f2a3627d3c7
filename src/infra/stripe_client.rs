use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_provider::{
        BillingProviderPort, ProviderPrice, ProviderProduct, ProviderSubscription,
    },
    infra::http_client,
};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a webhook timestamp before the delivery is rejected.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: SecretString,
}

impl StripeClient {
    pub fn new(secret_key: SecretString) -> Self {
        Self {
            client: http_client::build_client(),
            secret_key,
        }
    }

    fn auth_header(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:", self.secret_key.expose_secret()));
        format!("Basic {}", encoded)
    }

    // ========================================================================
    // Webhook Signature Verification
    // ========================================================================

    /// Verifies a `stripe-signature` header ("t=...,v1=...") against the
    /// raw request body.
    pub fn verify_webhook_signature(
        payload: &str,
        signature_header: &str,
        webhook_secret: &str,
    ) -> AppResult<()> {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() != 2 {
                continue;
            }
            match kv[0] {
                "t" => timestamp = Some(kv[1]),
                "v1" => signatures.push(kv[1]),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
        if signatures.is_empty() {
            return Err(AppError::InvalidSignature);
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        let mut mac = Hmac::<Sha256>::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal("HMAC error".into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        for sig in signatures {
            if constant_time_compare(sig, &expected) {
                let ts: i64 = timestamp.parse().map_err(|_| AppError::InvalidSignature)?;
                let now = Utc::now().timestamp();
                if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
                    return Err(AppError::InvalidSignature);
                }
                return Ok(());
            }
        }

        Err(AppError::InvalidSignature)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> AppResult<T> {
        let response = self
            .client
            .get(format!("{}{}", STRIPE_API_BASE, path))
            .header("Authorization", self.auth_header())
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe request failed: {}", e)))?;
        Self::handle_response(response).await
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> AppResult<T> {
        let response = self
            .client
            .post(format!("{}{}", STRIPE_API_BASE, path))
            .header("Authorization", self.auth_header())
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe request failed: {}", e)))?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> AppResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Provider(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Stripe API error");
            if let Ok(error) = serde_json::from_str::<StripeErrorResponse>(&body) {
                return Err(AppError::Provider(format!(
                    "Stripe error: {}",
                    error.error.message.unwrap_or(error.error.error_type)
                )));
            }
            return Err(AppError::Provider(format!(
                "Stripe API error: {} - {}",
                status, body
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            tracing::error!(body = %body, error = %e, "Failed to parse Stripe response");
            AppError::Provider(format!("Failed to parse Stripe response: {}", e))
        })
    }
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

fn metadata_params(metadata: &JsonValue) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(map) = metadata.as_object() {
        for (key, value) in map {
            let value = match value {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.push((format!("metadata[{}]", key), value));
        }
    }
    params
}

fn epoch_to_utc(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
}

// ============================================================================
// Port Implementation
// ============================================================================

#[async_trait]
impl BillingProviderPort for StripeClient {
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<ProviderSubscription> {
        let sub: StripeSubscription = self
            .get(&format!("/subscriptions/{}", subscription_id), &[])
            .await?;
        Ok(sub.into_provider())
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(format!(
                "{}/subscriptions/{}",
                STRIPE_API_BASE, subscription_id
            ))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("Stripe request failed: {}", e)))?;
        let _: StripeSubscription = Self::handle_response(response).await?;
        Ok(())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
        reason: Option<&str>,
    ) -> AppResult<ProviderSubscription> {
        let mut params = vec![("cancel_at_period_end".to_string(), cancel.to_string())];
        if let Some(reason) = reason {
            params.push((
                "metadata[cancellationReason]".to_string(),
                reason.to_string(),
            ));
        }
        let sub: StripeSubscription = self
            .post_form(&format!("/subscriptions/{}", subscription_id), &params)
            .await?;
        Ok(sub.into_provider())
    }

    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &JsonValue,
    ) -> AppResult<()> {
        let params = metadata_params(metadata);
        let _: StripeSubscription = self
            .post_form(&format!("/subscriptions/{}", subscription_id), &params)
            .await?;
        Ok(())
    }

    async fn update_invoice_metadata(
        &self,
        invoice_id: &str,
        metadata: &JsonValue,
    ) -> AppResult<()> {
        let params = metadata_params(metadata);
        let _: StripeInvoice = self
            .post_form(&format!("/invoices/{}", invoice_id), &params)
            .await?;
        Ok(())
    }

    async fn get_customer_email(&self, customer_id: &str) -> AppResult<Option<String>> {
        let customer: StripeCustomer = self
            .get(&format!("/customers/{}", customer_id), &[])
            .await?;
        Ok(customer.email)
    }

    async fn list_active_prices(&self) -> AppResult<Vec<ProviderPrice>> {
        let list: StripePriceList = self
            .get("/prices", &[("active", "true"), ("limit", "100")])
            .await?;
        Ok(list.data.into_iter().map(StripePrice::into_provider).collect())
    }

    async fn list_prices_for_product(&self, product_id: &str) -> AppResult<Vec<ProviderPrice>> {
        let list: StripePriceList = self
            .get("/prices", &[("product", product_id), ("limit", "100")])
            .await?;
        Ok(list.data.into_iter().map(StripePrice::into_provider).collect())
    }

    async fn get_product(&self, product_id: &str) -> AppResult<ProviderProduct> {
        let product: StripeProduct = self
            .get(&format!("/products/{}", product_id), &[])
            .await?;
        Ok(ProviderProduct {
            id: product.id,
            name: product.name,
            description: product.description,
            metadata: product.metadata.unwrap_or_else(|| serde_json::json!({})),
        })
    }
}

// ============================================================================
// Stripe Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StripeProduct {
    id: String,
    name: String,
    description: Option<String>,
    metadata: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    product: String,
    unit_amount: Option<i64>,
    currency: String,
    active: bool,
    recurring: Option<StripePriceRecurring>,
}

impl StripePrice {
    fn into_provider(self) -> ProviderPrice {
        ProviderPrice {
            id: self.id,
            product_id: self.product,
            unit_amount_cents: self.unit_amount.unwrap_or(0),
            currency: self.currency,
            interval: self.recurring.map(|r| r.interval),
            active: self.active,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripePriceRecurring {
    interval: String,
}

#[derive(Debug, Deserialize)]
struct StripePriceList {
    data: Vec<StripePrice>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    #[allow(dead_code)]
    id: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: Option<String>,
    status: String,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    cancel_at_period_end: bool,
    canceled_at: Option<i64>,
    default_payment_method: Option<String>,
    #[serde(default)]
    metadata: JsonValue,
    items: Option<StripeSubscriptionItems>,
}

impl StripeSubscription {
    fn into_provider(self) -> ProviderSubscription {
        let (price_id, product_id) = self
            .items
            .as_ref()
            .and_then(|items| items.data.first())
            .map(|item| (Some(item.price.id.clone()), Some(item.price.product.clone())))
            .unwrap_or((None, None));
        ProviderSubscription {
            id: self.id,
            status: self.status,
            customer_id: self.customer,
            price_id,
            product_id,
            current_period_start: epoch_to_utc(self.current_period_start),
            current_period_end: epoch_to_utc(self.current_period_end),
            cancel_at_period_end: self.cancel_at_period_end,
            canceled_at: epoch_to_utc(self.canceled_at),
            default_payment_method_id: self.default_payment_method,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItems {
    data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: StripePrice,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    #[allow(dead_code)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(rename = "type")]
    error_type: String,
    message: Option<String>,
}
