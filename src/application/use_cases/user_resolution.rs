use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::application::use_cases::billing::SubscriptionRepoTrait;
use crate::application::use_cases::identity::UserRepoTrait;
use crate::domain::entities::webhook_event::Provider;

pub const STRATEGY_CLERK_DIRECT: &str = "clerk_direct";
pub const STRATEGY_METADATA_USER_ID: &str = "metadata_user_id";
pub const STRATEGY_CUSTOMER_EMAIL: &str = "customer_email";
pub const STRATEGY_SUBSCRIPTION_LOOKUP: &str = "subscription_lookup";

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionAttempt {
    pub strategy: &'static str,
    /// The identifier the strategy extracted from the payload, if any.
    pub identifier: Option<String>,
    pub matched: bool,
    pub at: NaiveDateTime,
}

/// Audit trail of a resolution run, stored alongside the logged event.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionTrail {
    pub attempts: Vec<ResolutionAttempt>,
    pub resolved_user_id: Option<Uuid>,
    pub strategy: Option<&'static str>,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub elapsed_ms: i64,
    pub error: Option<String>,
}

impl ResolutionTrail {
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Maps webhook payloads to internal users. Resolution never fails the
/// event: lookup errors are captured into the trail and the next strategy
/// runs.
#[derive(Clone)]
pub struct UserResolutionService {
    users: Arc<dyn UserRepoTrait>,
    subscriptions: Arc<dyn SubscriptionRepoTrait>,
}

impl UserResolutionService {
    pub fn new(
        users: Arc<dyn UserRepoTrait>,
        subscriptions: Arc<dyn SubscriptionRepoTrait>,
    ) -> Self {
        Self {
            users,
            subscriptions,
        }
    }

    pub async fn resolve(
        &self,
        provider: Provider,
        payload: &JsonValue,
    ) -> (Option<Uuid>, ResolutionTrail) {
        let started = Instant::now();
        let started_at = Utc::now().naive_utc();
        let mut attempts = Vec::new();
        let mut error: Option<String> = None;

        let resolved = match provider {
            Provider::Clerk => {
                self.resolve_clerk(payload, &mut attempts, &mut error).await
            }
            Provider::Stripe => {
                self.resolve_stripe(payload, &mut attempts, &mut error).await
            }
        };

        let finished_at = Utc::now().naive_utc();
        let trail = ResolutionTrail {
            strategy: resolved.map(|(_, s)| s),
            resolved_user_id: resolved.map(|(id, _)| id),
            attempts,
            started_at,
            finished_at,
            elapsed_ms: started.elapsed().as_millis() as i64,
            error,
        };
        (trail.resolved_user_id, trail)
    }

    async fn resolve_clerk(
        &self,
        payload: &JsonValue,
        attempts: &mut Vec<ResolutionAttempt>,
        error: &mut Option<String>,
    ) -> Option<(Uuid, &'static str)> {
        let data = &payload["data"];
        let external_id = data["id"].as_str().or_else(|| data["user_id"].as_str());

        let mut matched = None;
        if let Some(ext) = external_id {
            match self.users.get_by_external_id(ext).await {
                Ok(Some(user)) => matched = Some(user.id),
                Ok(None) => {}
                Err(err) => *error = Some(err.to_string()),
            }
        }
        attempts.push(attempt(STRATEGY_CLERK_DIRECT, external_id, matched.is_some()));
        matched.map(|id| (id, STRATEGY_CLERK_DIRECT))
    }

    async fn resolve_stripe(
        &self,
        payload: &JsonValue,
        attempts: &mut Vec<ResolutionAttempt>,
        error: &mut Option<String>,
    ) -> Option<(Uuid, &'static str)> {
        let object = &payload["data"]["object"];

        // 1. Explicit userId stamped into provider metadata.
        let meta_user = object["metadata"]["userId"].as_str();
        let mut matched = None;
        if let Some(ext) = meta_user {
            match self.users.get_by_external_id(ext).await {
                Ok(Some(user)) => matched = Some(user.id),
                Ok(None) => {}
                Err(err) => *error = Some(err.to_string()),
            }
        }
        attempts.push(attempt(
            STRATEGY_METADATA_USER_ID,
            meta_user,
            matched.is_some(),
        ));
        if let Some(id) = matched {
            return Some((id, STRATEGY_METADATA_USER_ID));
        }

        // 2. Customer email carried on the object.
        let email = object["customer_details"]["email"]
            .as_str()
            .or_else(|| object["customer_email"].as_str())
            .or_else(|| object["email"].as_str());
        let mut matched = None;
        if let Some(addr) = email {
            match self.users.get_by_email(addr).await {
                Ok(Some(user)) => matched = Some(user.id),
                Ok(None) => {}
                Err(err) => *error = Some(err.to_string()),
            }
        }
        attempts.push(attempt(STRATEGY_CUSTOMER_EMAIL, email, matched.is_some()));
        if let Some(id) = matched {
            return Some((id, STRATEGY_CUSTOMER_EMAIL));
        }

        // 3. Owner recorded on a previously reconciled subscription.
        let sub_id = object["subscription"]
            .as_str()
            .or_else(|| object["id"].as_str().filter(|id| id.starts_with("sub_")));
        let mut matched = None;
        if let Some(sid) = sub_id {
            match self.lookup_via_subscription(sid).await {
                Ok(found) => matched = found,
                Err(err) => *error = Some(err.to_string()),
            }
        }
        attempts.push(attempt(
            STRATEGY_SUBSCRIPTION_LOOKUP,
            sub_id,
            matched.is_some(),
        ));
        matched.map(|id| (id, STRATEGY_SUBSCRIPTION_LOOKUP))
    }

    async fn lookup_via_subscription(
        &self,
        subscription_id: &str,
    ) -> crate::app_error::AppResult<Option<Uuid>> {
        let Some(row) = self
            .subscriptions
            .get_by_subscription_id(subscription_id)
            .await?
        else {
            return Ok(None);
        };
        let Some(ext) = row.user_id else {
            return Ok(None);
        };
        Ok(self.users.get_by_external_id(&ext).await?.map(|u| u.id))
    }
}

fn attempt(strategy: &'static str, identifier: Option<&str>, matched: bool) -> ResolutionAttempt {
    ResolutionAttempt {
        strategy,
        identifier: identifier.map(str::to_string),
        matched,
        at: Utc::now().naive_utc(),
    }
}
