use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::event_log::{
        EventLogFilter, NewWebhookEvent, WebhookEventProfile, WebhookEventRepoTrait,
    },
    domain::entities::webhook_event::{EventStatus, Provider},
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> WebhookEventProfile {
    WebhookEventProfile {
        id: row.get("id"),
        provider: row.get("provider"),
        event_id: row.get("event_id"),
        event_type: row.get("event_type"),
        status: row.get("status"),
        payload: row.get("payload"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        user_id: row.get("user_id"),
        resolution: row.get("resolution"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, provider, event_id, event_type, status, payload, error, retry_count,
    user_id, resolution, metadata, created_at, processed_at
"#;

const FILTER_CLAUSE: &str = r#"
    ($1::text IS NULL OR event_type LIKE '%' || $1 || '%')
    AND ($2::webhook_provider IS NULL OR provider = $2)
    AND ($3::webhook_event_status IS NULL OR status = $3)
    AND ($4::timestamp IS NULL OR created_at >= $4)
    AND ($5::timestamp IS NULL OR created_at <= $5)
"#;

#[async_trait]
impl WebhookEventRepoTrait for PostgresPersistence {
    async fn insert(&self, event: NewWebhookEvent) -> AppResult<Option<WebhookEventProfile>> {
        // ON CONFLICT DO NOTHING returns no row for a duplicate delivery.
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO webhook_events
                (provider, event_id, event_type, payload, user_id, resolution, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider, event_id) DO NOTHING
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(event.provider)
        .bind(event.event_id)
        .bind(event.event_type)
        .bind(event.payload)
        .bind(event.user_id)
        .bind(event.resolution)
        .bind(event.metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn advance_status(
        &self,
        id: Uuid,
        next: EventStatus,
        error: Option<&str>,
        metadata_patch: &JsonValue,
    ) -> AppResult<bool> {
        // The WHERE guard enforces the forward-only lifecycle; a retried
        // update against a terminal row affects nothing.
        let allowed_from: &[EventStatus] = match next {
            EventStatus::Pending => return Ok(false),
            EventStatus::Processing => &[EventStatus::Pending],
            EventStatus::Completed | EventStatus::Failed => {
                &[EventStatus::Pending, EventStatus::Processing]
            }
        };
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                status = $2,
                error = COALESCE($3, error),
                metadata = metadata || $4,
                retry_count = retry_count + CASE WHEN $5 THEN 1 ELSE 0 END,
                processed_at = CASE WHEN $6 THEN NOW() ELSE processed_at END
            WHERE id = $1 AND status = ANY($7)
            "#,
        )
        .bind(id)
        .bind(next)
        .bind(error)
        .bind(metadata_patch)
        .bind(next == EventStatus::Failed)
        .bind(next.is_terminal())
        .bind(allowed_from)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<WebhookEventProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_events WHERE id = $1",
            SELECT_COLS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn get_by_event_id(
        &self,
        provider: Provider,
        event_id: &str,
    ) -> AppResult<Option<WebhookEventProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM webhook_events WHERE provider = $1 AND event_id = $2",
            SELECT_COLS
        ))
        .bind(provider)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn list(
        &self,
        filter: &EventLogFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WebhookEventProfile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM webhook_events
            WHERE {}
            ORDER BY created_at DESC
            LIMIT $6 OFFSET $7
            "#,
            SELECT_COLS, FILTER_CLAUSE
        ))
        .bind(filter.event_type.as_deref())
        .bind(filter.provider)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn count(&self, filter: &EventLogFilter) -> AppResult<i64> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM webhook_events WHERE {}",
            FILTER_CLAUSE
        ))
        .bind(filter.event_type.as_deref())
        .bind(filter.provider)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.get("total"))
    }
}
