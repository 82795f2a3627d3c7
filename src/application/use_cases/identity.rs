use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};
use crate::application::ports::billing_provider::BillingProviderPort;
use crate::application::ports::notifications::{NotificationSender, NotificationTemplate};
use crate::application::use_cases::billing::SubscriptionRepoTrait;
use crate::application::use_cases::event_router::HandlerOutcome;
use crate::domain::entities::user::UserStatus;

// ============================================================================
// Repository Trait
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub status: UserStatus,
    /// Denormalized mirror of the current subscription status.
    pub subscription_status: Option<String>,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[async_trait]
pub trait UserRepoTrait: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserProfile>>;

    async fn get_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>>;

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserProfile>>;

    async fn insert(&self, user: NewUser) -> AppResult<UserProfile>;

    async fn update_profile(
        &self,
        id: Uuid,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        profile_image_url: Option<&str>,
    ) -> AppResult<UserProfile>;

    /// Attaches an identity-provider id to an existing account.
    async fn adopt_external_id(&self, id: Uuid, external_id: &str) -> AppResult<()>;

    async fn set_status(
        &self,
        id: Uuid,
        status: UserStatus,
        deleted_at: Option<NaiveDateTime>,
    ) -> AppResult<()>;

    /// Updates the denormalized subscription status mirror. None clears it.
    async fn set_subscription_mirror(&self, id: Uuid, status: Option<&str>) -> AppResult<()>;
}

// ============================================================================
// Use Cases
// ============================================================================

#[derive(Clone)]
pub struct IdentityUseCases {
    users: Arc<dyn UserRepoTrait>,
    subscriptions: Arc<dyn SubscriptionRepoTrait>,
    provider: Arc<dyn BillingProviderPort>,
    notifier: Arc<dyn NotificationSender>,
}

impl IdentityUseCases {
    pub fn new(
        users: Arc<dyn UserRepoTrait>,
        subscriptions: Arc<dyn SubscriptionRepoTrait>,
        provider: Arc<dyn BillingProviderPort>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            users,
            subscriptions,
            provider,
            notifier,
        }
    }

    #[instrument(skip(self, payload))]
    pub async fn user_created(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let data = &payload["data"];
        let external_id = data["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.id".into()))?;
        let email = primary_email(data)
            .ok_or_else(|| AppError::MissingField("data.email_addresses".into()))?;

        if let Some(existing) = self.users.get_by_external_id(external_id).await? {
            tracing::info!(user_id = %existing.id, "User already known, skipping create");
            return Ok(HandlerOutcome::AlreadyProcessed);
        }

        // A checkout can land before the identity webhook; in that case an
        // account keyed by email already exists and just gains the id.
        if let Some(existing) = self.users.get_by_email(&email).await? {
            self.users
                .adopt_external_id(existing.id, external_id)
                .await?;
            let relinked = self
                .subscriptions
                .relink_user(&email, external_id)
                .await?;
            tracing::info!(
                user_id = %existing.id,
                external_id,
                relinked,
                "Adopted external id for existing account"
            );
            return Ok(HandlerOutcome::Processed);
        }

        let user = self
            .users
            .insert(NewUser {
                external_id: Some(external_id.to_string()),
                email: Some(email),
                first_name: data["first_name"].as_str().map(str::to_string),
                last_name: data["last_name"].as_str().map(str::to_string),
                profile_image_url: data["image_url"].as_str().map(str::to_string),
            })
            .await?;
        tracing::info!(user_id = %user.id, external_id, "User created");
        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn user_updated(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let data = &payload["data"];
        let external_id = data["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.id".into()))?;

        let Some(user) = self.users.get_by_external_id(external_id).await? else {
            return Ok(HandlerOutcome::Ignored(format!(
                "unknown user {external_id}"
            )));
        };

        let user = self
            .users
            .update_profile(
                user.id,
                primary_email(data).as_deref(),
                data["first_name"].as_str(),
                data["last_name"].as_str(),
                data["image_url"].as_str(),
            )
            .await?;

        let locked = data["locked"].as_bool().unwrap_or(false);
        let banned = data["banned"].as_bool().unwrap_or(false);

        // Banned takes precedence over locked when both are set.
        let target = if banned {
            Some(UserStatus::Banned)
        } else if locked {
            Some(UserStatus::Blocked)
        } else if user.status == UserStatus::Blocked || user.status == UserStatus::Banned {
            Some(UserStatus::Active)
        } else {
            None
        };

        match target {
            Some(next) if next.is_deactivated() && !user.status.is_deactivated() => {
                self.deactivate(&user, next).await?;
            }
            Some(UserStatus::Active) => {
                if user.status.can_transition_to(UserStatus::Active) {
                    self.users
                        .set_status(user.id, UserStatus::Active, None)
                        .await?;
                    tracing::info!(user_id = %user.id, "User restored to active");
                }
            }
            _ => {}
        }

        Ok(HandlerOutcome::Processed)
    }

    #[instrument(skip(self, payload))]
    pub async fn user_deleted(&self, payload: &JsonValue) -> AppResult<HandlerOutcome> {
        let data = &payload["data"];
        let external_id = data["id"]
            .as_str()
            .ok_or_else(|| AppError::MissingField("data.id".into()))?;
        if !data["deleted"].as_bool().unwrap_or(false) {
            return Err(AppError::MissingField("data.deleted".into()));
        }

        let Some(user) = self.users.get_by_external_id(external_id).await? else {
            return Ok(HandlerOutcome::Ignored(format!(
                "unknown user {external_id}"
            )));
        };
        if user.status == UserStatus::Deleted {
            return Ok(HandlerOutcome::AlreadyProcessed);
        }

        self.deactivate(&user, UserStatus::Deleted).await?;
        Ok(HandlerOutcome::Processed)
    }

    /// Marks the user deactivated and cascades onto their subscriptions:
    /// active rows are cancelled locally and, best-effort, at the provider.
    async fn deactivate(&self, user: &UserProfile, status: UserStatus) -> AppResult<()> {
        let deleted_at = (status == UserStatus::Deleted).then(|| Utc::now().naive_utc());
        self.users.set_status(user.id, status, deleted_at).await?;
        self.users.set_subscription_mirror(user.id, None).await?;

        let Some(external_id) = user.external_id.as_deref() else {
            return Ok(());
        };

        let active = self.subscriptions.list_active_by_user(external_id).await?;
        let had_active = !active.is_empty();
        for row in active {
            self.subscriptions
                .mark_cancelled(
                    &row.subscription_id,
                    Utc::now().naive_utc(),
                    Some("account deactivated"),
                )
                .await?;
            if let Err(err) = self.provider.cancel_subscription(&row.subscription_id).await {
                tracing::warn!(
                    subscription_id = %row.subscription_id,
                    error = ?err,
                    "Provider cancel failed during deactivation"
                );
            }
        }

        if had_active && let Some(email) = user.email.as_deref() {
            if let Err(err) = self
                .notifier
                .send(email, &NotificationTemplate::AccountBlocked)
                .await
            {
                tracing::warn!(error = ?err, "Account-blocked notification failed");
            }
        }

        tracing::info!(user_id = %user.id, status = status.as_str(), "User deactivated");
        Ok(())
    }
}

/// Picks the primary email address from an identity payload, falling back
/// to the first listed address.
fn primary_email(data: &JsonValue) -> Option<String> {
    let addresses = data["email_addresses"].as_array()?;
    let primary_id = data["primary_email_address_id"].as_str();
    let chosen = primary_id
        .and_then(|id| {
            addresses
                .iter()
                .find(|entry| entry["id"].as_str() == Some(id))
        })
        .or_else(|| addresses.first())?;
    chosen["email_address"].as_str().map(str::to_string)
}
