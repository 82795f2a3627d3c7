use async_trait::async_trait;
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::billing::{PlanProfile, PlanRepoTrait, PlanUpsert},
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> PlanProfile {
    PlanProfile {
        id: row.get("id"),
        plan_id: row.get("plan_id"),
        name: row.get("name"),
        description: row.get("description"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        interval: row.get("interval"),
        active: row.get("active"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, plan_id, name, description, amount_cents, currency, interval,
    active, metadata, created_at, updated_at
"#;

#[async_trait]
impl PlanRepoTrait for PostgresPersistence {
    async fn get_by_plan_id(&self, plan_id: &str) -> AppResult<Option<PlanProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM subscription_plans WHERE plan_id = $1",
            SELECT_COLS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn list_active(&self) -> AppResult<Vec<PlanProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM subscription_plans WHERE active ORDER BY amount_cents",
            SELECT_COLS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn upsert(&self, plan: PlanUpsert) -> AppResult<PlanProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO subscription_plans
                (plan_id, name, description, amount_cents, currency, interval, active, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (plan_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                interval = EXCLUDED.interval,
                active = EXCLUDED.active,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(plan.plan_id)
        .bind(plan.name)
        .bind(plan.description)
        .bind(plan.amount_cents)
        .bind(plan.currency)
        .bind(plan.interval)
        .bind(plan.active)
        .bind(plan.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_profile(&row))
    }

    async fn deactivate(&self, plan_id: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE subscription_plans SET active = FALSE, updated_at = NOW() WHERE plan_id = $1",
        )
        .bind(plan_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(())
    }

    async fn deactivate_by_product(&self, product_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_plans SET active = FALSE, updated_at = NOW()
            WHERE active AND metadata->>'product_id' = $1
            "#,
        )
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }

    async fn deactivate_missing(&self, keep_plan_ids: &[String]) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_plans SET active = FALSE, updated_at = NOW()
            WHERE active AND plan_id <> ALL($1)
            "#,
        )
        .bind(keep_plan_ids)
        .execute(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(result.rows_affected())
    }
}
