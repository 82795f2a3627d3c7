use async_trait::async_trait;

use crate::app_error::AppResult;

// ============================================================================
// Notification Templates
// ============================================================================

/// Billing lifecycle notifications sent to the affected user. Rendering
/// lives here so senders only deal with subject/html pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationTemplate {
    SubscriptionCancelled {
        plan_name: Option<String>,
    },
    PaymentFailed {
        amount_due_cents: Option<i64>,
        currency: Option<String>,
    },
    PlanChanged {
        previous_plan: Option<String>,
        new_plan: String,
    },
    AccountBlocked,
    CancelScheduled {
        period_end: Option<String>,
    },
    CancelReverted,
}

impl NotificationTemplate {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationTemplate::SubscriptionCancelled { .. } => "subscription_cancelled",
            NotificationTemplate::PaymentFailed { .. } => "payment_failed",
            NotificationTemplate::PlanChanged { .. } => "plan_changed",
            NotificationTemplate::AccountBlocked => "account_blocked",
            NotificationTemplate::CancelScheduled { .. } => "cancel_scheduled",
            NotificationTemplate::CancelReverted => "cancel_reverted",
        }
    }

    pub fn subject(&self) -> String {
        match self {
            NotificationTemplate::SubscriptionCancelled { .. } => {
                "Your subscription has been cancelled".to_string()
            }
            NotificationTemplate::PaymentFailed { .. } => {
                "Payment failed for your subscription".to_string()
            }
            NotificationTemplate::PlanChanged { new_plan, .. } => {
                format!("Your plan is now {new_plan}")
            }
            NotificationTemplate::AccountBlocked => "Your account has been suspended".to_string(),
            NotificationTemplate::CancelScheduled { .. } => {
                "Your subscription cancellation is scheduled".to_string()
            }
            NotificationTemplate::CancelReverted => {
                "Your subscription will continue".to_string()
            }
        }
    }

    pub fn html(&self) -> String {
        match self {
            NotificationTemplate::SubscriptionCancelled { plan_name } => {
                let plan = plan_name.as_deref().unwrap_or("your plan");
                wrap(
                    "Subscription cancelled",
                    &format!(
                        "Your subscription to <strong>{plan}</strong> has been cancelled. \
                         You keep access until the end of the paid period."
                    ),
                )
            }
            NotificationTemplate::PaymentFailed {
                amount_due_cents,
                currency,
            } => {
                let amount = match (amount_due_cents, currency) {
                    (Some(cents), Some(cur)) => {
                        format!("{}.{:02} {}", cents / 100, cents % 100, cur.to_uppercase())
                    }
                    _ => "the amount due".to_string(),
                };
                wrap(
                    "Payment failed",
                    &format!(
                        "We could not collect {amount} for your subscription. \
                         Please update your payment method to keep your access."
                    ),
                )
            }
            NotificationTemplate::PlanChanged {
                previous_plan,
                new_plan,
            } => {
                let lead = match previous_plan {
                    Some(prev) => format!(
                        "Your plan changed from <strong>{prev}</strong> to <strong>{new_plan}</strong>."
                    ),
                    None => format!("You are now on <strong>{new_plan}</strong>."),
                };
                wrap("Plan updated", &lead)
            }
            NotificationTemplate::AccountBlocked => wrap(
                "Account suspended",
                "Your account has been suspended and any active subscription was cancelled. \
                 If you believe this is a mistake, please contact support.",
            ),
            NotificationTemplate::CancelScheduled { period_end } => {
                let until = match period_end {
                    Some(end) => format!("You keep full access until <strong>{end}</strong>."),
                    None => "You keep full access until the end of the current period.".to_string(),
                };
                wrap(
                    "Cancellation scheduled",
                    &format!("Your subscription will not renew. {until}"),
                )
            }
            NotificationTemplate::CancelReverted => wrap(
                "Subscription resumed",
                "The scheduled cancellation was reverted. Your subscription will renew as usual.",
            ),
        }
    }
}

fn wrap(headline: &str, lead: &str) -> String {
    format!(
        r#"<div style="font-family:sans-serif;max-width:560px;margin:0 auto;">
<h2 style="color:#111827;">{headline}</h2>
<p style="margin:12px 0 0;color:#374151;">{lead}</p>
</div>"#
    )
}

// ============================================================================
// Port Trait
// ============================================================================

/// Outbound notification boundary. Failures here are reported but never
/// fail the webhook that triggered them.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, template: &NotificationTemplate) -> AppResult<()>;
}
