//! Test data factories for creating valid test fixtures.
//!
//! Each factory creates a complete object with sensible defaults; use the
//! closure parameter to override specific fields.

use chrono::NaiveDateTime;
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::{
    application::ports::billing_provider::{ProviderPrice, ProviderProduct, ProviderSubscription},
    application::use_cases::{
        billing::{InvoiceProfile, PlanProfile, SubscriptionProfile},
        identity::UserProfile,
    },
    domain::entities::{
        invoice::InvoiceStatus, subscription::SubscriptionStatus,
        subscription_plan::PlanInterval, user::UserStatus,
    },
};

pub fn test_datetime() -> NaiveDateTime {
    chrono::DateTime::from_timestamp(1_700_000_000, 0)
        .unwrap()
        .naive_utc()
}

pub fn create_test_user(overrides: impl FnOnce(&mut UserProfile)) -> UserProfile {
    let mut user = UserProfile {
        id: Uuid::new_v4(),
        external_id: Some("user_abc123".to_string()),
        email: Some("alice@example.com".to_string()),
        first_name: Some("Alice".to_string()),
        last_name: Some("Doe".to_string()),
        profile_image_url: None,
        status: UserStatus::Active,
        subscription_status: None,
        deleted_at: None,
        created_at: test_datetime(),
    };
    overrides(&mut user);
    user
}

pub fn create_test_subscription(
    overrides: impl FnOnce(&mut SubscriptionProfile),
) -> SubscriptionProfile {
    let mut sub = SubscriptionProfile {
        id: Uuid::new_v4(),
        subscription_id: "sub_1".to_string(),
        user_id: Some("user_abc123".to_string()),
        email: Some("alice@example.com".to_string()),
        status: SubscriptionStatus::Active,
        customer_id: Some("cus_1".to_string()),
        plan_id: Some("price_basic_month".to_string()),
        current_period_start: Some(test_datetime()),
        current_period_end: None,
        default_payment_method_id: None,
        previous_plan_id: None,
        plan_changed_at: None,
        canceled_at: None,
        cancel_at_period_end: false,
        cancellation_reason: None,
        cancel_requested_at: None,
        created_at: test_datetime(),
    };
    overrides(&mut sub);
    sub
}

pub fn create_test_plan(overrides: impl FnOnce(&mut PlanProfile)) -> PlanProfile {
    let mut plan = PlanProfile {
        id: Uuid::new_v4(),
        plan_id: "price_basic_month".to_string(),
        name: "Basic".to_string(),
        description: Some("Basic plan".to_string()),
        amount_cents: 999,
        currency: "usd".to_string(),
        interval: PlanInterval::Month,
        active: true,
        metadata: Some(json!({ "product_id": "prod_basic" })),
        created_at: test_datetime(),
        updated_at: test_datetime(),
    };
    overrides(&mut plan);
    plan
}

pub fn create_test_invoice(overrides: impl FnOnce(&mut InvoiceProfile)) -> InvoiceProfile {
    let mut invoice = InvoiceProfile {
        id: Uuid::new_v4(),
        invoice_id: "in_1".to_string(),
        subscription_id: Some("sub_1".to_string()),
        amount_paid_cents: Some(999),
        amount_due_cents: Some(999),
        currency: Some("usd".to_string()),
        status: InvoiceStatus::Succeeded,
        user_id: Some("user_abc123".to_string()),
        email: Some("alice@example.com".to_string()),
        period_start: Some(test_datetime()),
        period_end: None,
        payment_intent: Some("pi_1".to_string()),
        created_at: test_datetime(),
    };
    overrides(&mut invoice);
    invoice
}

pub fn create_provider_subscription(
    overrides: impl FnOnce(&mut ProviderSubscription),
) -> ProviderSubscription {
    let mut sub = ProviderSubscription {
        id: "sub_1".to_string(),
        status: "active".to_string(),
        customer_id: Some("cus_1".to_string()),
        price_id: Some("price_basic_month".to_string()),
        product_id: Some("prod_basic".to_string()),
        current_period_start: Some(chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap()),
        current_period_end: Some(chrono::DateTime::from_timestamp(1_702_592_000, 0).unwrap()),
        cancel_at_period_end: false,
        canceled_at: None,
        default_payment_method_id: None,
        metadata: json!({}),
    };
    overrides(&mut sub);
    sub
}

pub fn create_provider_price(overrides: impl FnOnce(&mut ProviderPrice)) -> ProviderPrice {
    let mut price = ProviderPrice {
        id: "price_basic_month".to_string(),
        product_id: "prod_basic".to_string(),
        unit_amount_cents: 999,
        currency: "usd".to_string(),
        interval: Some("month".to_string()),
        active: true,
    };
    overrides(&mut price);
    price
}

pub fn create_provider_product(overrides: impl FnOnce(&mut ProviderProduct)) -> ProviderProduct {
    let mut product = ProviderProduct {
        id: "prod_basic".to_string(),
        name: "Basic".to_string(),
        description: Some("Basic plan".to_string()),
        metadata: json!({}),
    };
    overrides(&mut product);
    product
}

// ============================================================================
// Webhook payload builders
// ============================================================================

/// Stripe event envelope around an object.
pub fn stripe_event(event_type: &str, object: JsonValue) -> JsonValue {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    })
}

pub fn subscription_object(subscription_id: &str, customer_id: &str, status: &str) -> JsonValue {
    json!({
        "id": subscription_id,
        "customer": customer_id,
        "status": status,
        "cancel_at_period_end": false,
        "current_period_start": 1_700_000_000,
        "current_period_end": 1_702_592_000,
        "metadata": {},
        "items": {
            "data": [ { "price": { "id": "price_basic_month", "product": "prod_basic" } } ]
        }
    })
}

pub fn checkout_session_object(
    subscription_id: &str,
    user_id: &str,
    email: &str,
) -> JsonValue {
    json!({
        "id": format!("cs_{}", Uuid::new_v4().simple()),
        "subscription": subscription_id,
        "metadata": { "userId": user_id, "email": email }
    })
}

pub fn invoice_object(invoice_id: &str, subscription_id: &str, email: &str) -> JsonValue {
    json!({
        "id": invoice_id,
        "subscription": subscription_id,
        "customer_email": email,
        "amount_paid": 999,
        "amount_due": 999,
        "currency": "usd",
        "payment_intent": "pi_1",
        "metadata": {},
        "lines": {
            "data": [ {
                "metadata": {},
                "period": { "start": 1_700_000_000, "end": 1_702_592_000 }
            } ]
        }
    })
}

/// Clerk event envelope.
pub fn clerk_event(event_type: &str, data: JsonValue) -> JsonValue {
    json!({ "type": event_type, "data": data, "object": "event" })
}

pub fn clerk_user_data(external_id: &str, email: &str) -> JsonValue {
    json!({
        "id": external_id,
        "first_name": "Alice",
        "last_name": "Doe",
        "image_url": "https://img.example.com/a.png",
        "locked": false,
        "banned": false,
        "primary_email_address_id": "idn_1",
        "email_addresses": [
            { "id": "idn_1", "email_address": email }
        ]
    })
}
