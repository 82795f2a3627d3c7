//! Mock billing provider and notification sender for use case tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
    app_error::{AppError, AppResult},
    application::ports::billing_provider::{
        BillingProviderPort, ProviderPrice, ProviderProduct, ProviderSubscription,
    },
    application::ports::notifications::{NotificationSender, NotificationTemplate},
};

// ============================================================================
// MockBillingProvider
// ============================================================================

/// In-memory stand-in for the provider API. Records every mutating call so
/// tests can assert on the outbound traffic.
#[derive(Default)]
pub struct MockBillingProvider {
    pub subscriptions: Mutex<HashMap<String, ProviderSubscription>>,
    pub customer_emails: Mutex<HashMap<String, String>>,
    pub prices: Mutex<Vec<ProviderPrice>>,
    pub products: Mutex<HashMap<String, ProviderProduct>>,
    /// Call log: "cancel:sub_1", "metadata:sub_1", "invoice_metadata:in_1",
    /// "cancel_at_period_end:sub_1:true".
    pub calls: Mutex<Vec<String>>,
    /// When set, every call fails with this message.
    pub fail_with: Mutex<Option<String>>,
}

impl MockBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&self, sub: ProviderSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(sub.id.clone(), sub);
    }

    pub fn add_customer_email(&self, customer_id: &str, email: &str) {
        self.customer_emails
            .lock()
            .unwrap()
            .insert(customer_id.to_string(), email.to_string());
    }

    pub fn add_product(&self, product: ProviderProduct) {
        self.products
            .lock()
            .unwrap()
            .insert(product.id.clone(), product);
    }

    pub fn add_price(&self, price: ProviderPrice) {
        self.prices.lock().unwrap().push(price);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check_failure(&self) -> AppResult<()> {
        if let Some(msg) = self.fail_with.lock().unwrap().clone() {
            return Err(AppError::Provider(msg));
        }
        Ok(())
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BillingProviderPort for MockBillingProvider {
    async fn get_subscription(&self, subscription_id: &str) -> AppResult<ProviderSubscription> {
        self.check_failure()?;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| AppError::Provider(format!("no such subscription {subscription_id}")))
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> AppResult<()> {
        self.check_failure()?;
        self.record(format!("cancel:{subscription_id}"));
        if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(subscription_id) {
            sub.status = "canceled".to_string();
        }
        Ok(())
    }

    async fn set_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
        _reason: Option<&str>,
    ) -> AppResult<ProviderSubscription> {
        self.check_failure()?;
        self.record(format!("cancel_at_period_end:{subscription_id}:{cancel}"));
        let mut subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .get_mut(subscription_id)
            .ok_or_else(|| AppError::Provider(format!("no such subscription {subscription_id}")))?;
        sub.cancel_at_period_end = cancel;
        Ok(sub.clone())
    }

    async fn update_subscription_metadata(
        &self,
        subscription_id: &str,
        metadata: &JsonValue,
    ) -> AppResult<()> {
        self.check_failure()?;
        self.record(format!("metadata:{subscription_id}"));
        if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(subscription_id)
            && let (Some(existing), Some(patch)) =
                (sub.metadata.as_object_mut(), metadata.as_object())
        {
            for (key, value) in patch {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn update_invoice_metadata(
        &self,
        invoice_id: &str,
        _metadata: &JsonValue,
    ) -> AppResult<()> {
        self.check_failure()?;
        self.record(format!("invoice_metadata:{invoice_id}"));
        Ok(())
    }

    async fn get_customer_email(&self, customer_id: &str) -> AppResult<Option<String>> {
        self.check_failure()?;
        Ok(self.customer_emails.lock().unwrap().get(customer_id).cloned())
    }

    async fn list_active_prices(&self) -> AppResult<Vec<ProviderPrice>> {
        self.check_failure()?;
        Ok(self
            .prices
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn list_prices_for_product(&self, product_id: &str) -> AppResult<Vec<ProviderPrice>> {
        self.check_failure()?;
        Ok(self
            .prices
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn get_product(&self, product_id: &str) -> AppResult<ProviderProduct> {
        self.check_failure()?;
        self.products
            .lock()
            .unwrap()
            .get(product_id)
            .cloned()
            .ok_or_else(|| AppError::Provider(format!("no such product {product_id}")))
    }
}

// ============================================================================
// RecordingNotifier
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, NotificationTemplate)>>,
    pub fail: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, NotificationTemplate)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, tpl)| tpl.kind())
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, to: &str, template: &NotificationTemplate) -> AppResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Provider("notification channel down".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), template.clone()));
        Ok(())
    }
}
