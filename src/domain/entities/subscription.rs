use serde::{Deserialize, Serialize};

/// Subscription lifecycle as reported by the billing provider, normalized
/// to the set of states the reconciler tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "subscription_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Trialing,
    Incomplete,
    Unpaid,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Maps a raw provider status string. Provider statuses we do not
    /// track individually ("canceled", "incomplete_expired", "paused")
    /// collapse into the nearest tracked state.
    pub fn from_provider(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "trialing" => SubscriptionStatus::Trialing,
            "incomplete" => SubscriptionStatus::Incomplete,
            "unpaid" => SubscriptionStatus::Unpaid,
            "canceled" | "cancelled" | "incomplete_expired" | "paused" => {
                SubscriptionStatus::Cancelled
            }
            _ => SubscriptionStatus::Incomplete,
        }
    }

    /// Whether the subscription currently entitles the user to the plan.
    pub fn is_entitled(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}
