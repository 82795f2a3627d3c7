use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::billing::{
        MigrationOutcome, SubscriptionProfile, SubscriptionRepoTrait, SubscriptionUpsert,
    },
    domain::entities::subscription::SubscriptionStatus,
    domain::entities::user::UserStatus,
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> SubscriptionProfile {
    SubscriptionProfile {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        status: row.get("status"),
        customer_id: row.get("customer_id"),
        plan_id: row.get("plan_id"),
        current_period_start: row.get("current_period_start"),
        current_period_end: row.get("current_period_end"),
        default_payment_method_id: row.get("default_payment_method_id"),
        previous_plan_id: row.get("previous_plan_id"),
        plan_changed_at: row.get("plan_changed_at"),
        canceled_at: row.get("canceled_at"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        cancellation_reason: row.get("cancellation_reason"),
        cancel_requested_at: row.get("cancel_requested_at"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, subscription_id, user_id, email, status, customer_id, plan_id,
    current_period_start, current_period_end, default_payment_method_id,
    previous_plan_id, plan_changed_at, canceled_at, cancel_at_period_end,
    cancellation_reason, cancel_requested_at, created_at
"#;

#[async_trait]
impl SubscriptionRepoTrait for PostgresPersistence {
    async fn get_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE subscription_id = $1",
            SELECT_COLS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn list_active_by_user(&self, user_id: &str) -> AppResult<Vec<SubscriptionProfile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE user_id = $1 AND status = $2 AND canceled_at IS NULL
            ORDER BY created_at DESC
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .bind(SubscriptionStatus::Active)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn find_current_for_user(
        &self,
        user_id: &str,
    ) -> AppResult<Option<SubscriptionProfile>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE user_id = $1 AND status = $2 AND canceled_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .bind(SubscriptionStatus::Active)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn upsert(&self, sub: SubscriptionUpsert) -> AppResult<SubscriptionProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscriptions (
                subscription_id, user_id, email, status, customer_id, plan_id,
                current_period_start, current_period_end, default_payment_method_id,
                previous_plan_id, plan_changed_at, canceled_at, cancel_at_period_end
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (subscription_id) DO UPDATE SET
                user_id = COALESCE(EXCLUDED.user_id, subscriptions.user_id),
                email = COALESCE(EXCLUDED.email, subscriptions.email),
                status = EXCLUDED.status,
                customer_id = COALESCE(EXCLUDED.customer_id, subscriptions.customer_id),
                plan_id = COALESCE(EXCLUDED.plan_id, subscriptions.plan_id),
                current_period_start =
                    COALESCE(EXCLUDED.current_period_start, subscriptions.current_period_start),
                current_period_end =
                    COALESCE(EXCLUDED.current_period_end, subscriptions.current_period_end),
                default_payment_method_id = COALESCE(
                    EXCLUDED.default_payment_method_id, subscriptions.default_payment_method_id),
                previous_plan_id =
                    COALESCE(EXCLUDED.previous_plan_id, subscriptions.previous_plan_id),
                plan_changed_at =
                    COALESCE(EXCLUDED.plan_changed_at, subscriptions.plan_changed_at),
                canceled_at = EXCLUDED.canceled_at,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(sub.subscription_id)
        .bind(sub.user_id)
        .bind(sub.email)
        .bind(sub.status)
        .bind(sub.customer_id)
        .bind(sub.plan_id)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.default_payment_method_id)
        .bind(sub.previous_plan_id)
        .bind(sub.plan_changed_at)
        .bind(sub.canceled_at)
        .bind(sub.cancel_at_period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_profile(&row))
    }

    async fn mark_cancelled(
        &self,
        subscription_id: &str,
        canceled_at: NaiveDateTime,
        reason: Option<&str>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                canceled_at = $3,
                cancellation_reason = COALESCE($4, cancellation_reason)
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(SubscriptionStatus::Cancelled)
        .bind(canceled_at)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_cancel_flag(
        &self,
        subscription_id: &str,
        cancel: bool,
        reason: Option<&str>,
        requested_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                cancel_at_period_end = $2,
                cancellation_reason = $3,
                cancel_requested_at = $4
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(cancel)
        .bind(reason)
        .bind(requested_at)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn relink_user(&self, email: &str, user_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET user_id = $2 WHERE email = $1 AND user_id IS DISTINCT FROM $2",
        )
        .bind(email)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }

    async fn migrate_to(
        &self,
        user_id: &str,
        new_subscription_id: &str,
        previous_plan_id: Option<&str>,
    ) -> AppResult<MigrationOutcome> {
        let mut tx = self.pool.begin().await.map_err(AppError::from)?;

        // Serialize migrations per user for the duration of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        let owner = sqlx::query("SELECT id, status FROM users WHERE external_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::from)?;
        if let Some(owner) = &owner {
            let status: UserStatus = owner.get("status");
            if status.is_deactivated() {
                tx.rollback().await.map_err(AppError::from)?;
                return Err(AppError::DeactivatedUser);
            }
        }

        let superseded = sqlx::query(&format!(
            r#"
            UPDATE subscriptions SET status = $3, canceled_at = NOW()
            WHERE user_id = $1 AND subscription_id <> $2
              AND status = $4 AND canceled_at IS NULL
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .bind(new_subscription_id)
        .bind(SubscriptionStatus::Cancelled)
        .bind(SubscriptionStatus::Active)
        .fetch_all(&mut *tx)
        .await
        .map_err(AppError::from)?;

        let activated = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $3,
                canceled_at = NULL,
                cancel_at_period_end = FALSE,
                cancellation_reason = NULL,
                cancel_requested_at = NULL,
                previous_plan_id = COALESCE($4, previous_plan_id),
                plan_changed_at = CASE WHEN $4 IS NULL THEN plan_changed_at ELSE NOW() END
            WHERE subscription_id = $2 AND user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(new_subscription_id)
        .bind(SubscriptionStatus::Active)
        .bind(previous_plan_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;
        if activated.rows_affected() == 0 {
            tx.rollback().await.map_err(AppError::from)?;
            return Err(AppError::NotFound);
        }

        sqlx::query("UPDATE users SET subscription_status = 'active' WHERE external_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(AppError::from)?;

        tx.commit().await.map_err(AppError::from)?;

        Ok(MigrationOutcome {
            superseded: superseded.iter().map(row_to_profile).collect(),
        })
    }
}
