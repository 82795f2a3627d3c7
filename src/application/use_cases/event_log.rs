use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::app_error::AppResult;
use crate::domain::entities::webhook_event::{EventStatus, Provider};

// ============================================================================
// Repository Trait
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventProfile {
    pub id: Uuid,
    pub provider: Provider,
    pub event_id: String,
    pub event_type: String,
    pub status: EventStatus,
    pub payload: JsonValue,
    pub error: Option<String>,
    pub retry_count: i32,
    pub user_id: Option<Uuid>,
    pub resolution: Option<JsonValue>,
    pub metadata: JsonValue,
    pub created_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: Provider,
    pub event_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub user_id: Option<Uuid>,
    pub resolution: Option<JsonValue>,
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Default)]
pub struct EventLogFilter {
    /// Substring match on the event type.
    pub event_type: Option<String>,
    pub provider: Option<Provider>,
    pub status: Option<EventStatus>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

#[async_trait]
pub trait WebhookEventRepoTrait: Send + Sync {
    /// Inserts a pending event. Returns None when (provider, event_id)
    /// already exists, which signals a duplicate provider delivery.
    async fn insert(&self, event: NewWebhookEvent) -> AppResult<Option<WebhookEventProfile>>;

    /// Advances the status, guarded so terminal states never regress.
    /// `metadata_patch` is merged into the stored metadata; terminal states
    /// stamp processed_at. Returns false when the guard rejected the move.
    async fn advance_status(
        &self,
        id: Uuid,
        next: EventStatus,
        error: Option<&str>,
        metadata_patch: &JsonValue,
    ) -> AppResult<bool>;

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<WebhookEventProfile>>;

    async fn get_by_event_id(
        &self,
        provider: Provider,
        event_id: &str,
    ) -> AppResult<Option<WebhookEventProfile>>;

    async fn list(
        &self,
        filter: &EventLogFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WebhookEventProfile>>;

    async fn count(&self, filter: &EventLogFilter) -> AppResult<i64>;
}

// ============================================================================
// Use Cases
// ============================================================================

/// One page of the event log, carrying the effective pagination values
/// after clamping.
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub items: Vec<WebhookEventProfile>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Outcome of attempting to log an incoming delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Logged(Uuid),
    /// The provider already delivered this event.
    Duplicate,
    /// Logging disabled or failed; processing continues without audit.
    Skipped,
}

/// Audit log of webhook deliveries. Every write here is best-effort:
/// a broken log must never block event processing.
#[derive(Clone)]
pub struct EventLogUseCases {
    repo: Arc<dyn WebhookEventRepoTrait>,
    enabled: bool,
}

impl EventLogUseCases {
    pub fn new(repo: Arc<dyn WebhookEventRepoTrait>, enabled: bool) -> Self {
        Self { repo, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn record_received(&self, event: NewWebhookEvent) -> RecordOutcome {
        if !self.enabled {
            return RecordOutcome::Skipped;
        }
        let provider = event.provider;
        let event_id = event.event_id.clone();
        match self.repo.insert(event).await {
            Ok(Some(profile)) => RecordOutcome::Logged(profile.id),
            Ok(None) => {
                tracing::info!(
                    provider = provider.as_str(),
                    event_id = %event_id,
                    "Duplicate webhook delivery"
                );
                RecordOutcome::Duplicate
            }
            Err(err) => {
                tracing::warn!(
                    provider = provider.as_str(),
                    event_id = %event_id,
                    error = ?err,
                    "Failed to log webhook event"
                );
                RecordOutcome::Skipped
            }
        }
    }

    pub async fn mark_processing(&self, id: Uuid) {
        self.advance(id, EventStatus::Processing, None, serde_json::json!({}))
            .await;
    }

    pub async fn mark_completed(&self, id: Uuid, elapsed_ms: i64, outcome: &str) {
        self.advance(
            id,
            EventStatus::Completed,
            None,
            serde_json::json!({ "elapsed_ms": elapsed_ms, "outcome": outcome }),
        )
        .await;
    }

    pub async fn mark_failed(&self, id: Uuid, error: &str, elapsed_ms: i64) {
        self.advance(
            id,
            EventStatus::Failed,
            Some(error),
            serde_json::json!({ "elapsed_ms": elapsed_ms }),
        )
        .await;
    }

    async fn advance(
        &self,
        id: Uuid,
        next: EventStatus,
        error: Option<&str>,
        metadata_patch: JsonValue,
    ) {
        match self.repo.advance_status(id, next, error, &metadata_patch).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    event_log_id = %id,
                    next = next.as_str(),
                    "Status transition rejected"
                );
            }
            Err(err) => {
                tracing::warn!(event_log_id = %id, error = ?err, "Failed to update event log");
            }
        }
    }

    // Diagnostics, served by the log endpoints.

    pub async fn get_by_id(&self, id: Uuid) -> AppResult<Option<WebhookEventProfile>> {
        self.repo.get_by_id(id).await
    }

    pub async fn get(
        &self,
        provider: Provider,
        event_id: &str,
    ) -> AppResult<Option<WebhookEventProfile>> {
        self.repo.get_by_event_id(provider, event_id).await
    }

    pub async fn list(
        &self,
        filter: &EventLogFilter,
        page: i64,
        per_page: i64,
    ) -> AppResult<EventPage> {
        let per_page = per_page.clamp(1, 100);
        let page = page.max(1);
        let items = self
            .repo
            .list(filter, per_page, (page - 1) * per_page)
            .await?;
        let total = self.repo.count(filter).await?;
        Ok(EventPage {
            items,
            total,
            page,
            per_page,
        })
    }
}
