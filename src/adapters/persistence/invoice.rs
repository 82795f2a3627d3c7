use async_trait::async_trait;
use sqlx::Row;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::billing::{InvoiceProfile, InvoiceRepoTrait, InvoiceUpsert},
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> InvoiceProfile {
    InvoiceProfile {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        subscription_id: row.get("subscription_id"),
        amount_paid_cents: row.get("amount_paid_cents"),
        amount_due_cents: row.get("amount_due_cents"),
        currency: row.get("currency"),
        status: row.get("status"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        payment_intent: row.get("payment_intent"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, invoice_id, subscription_id, amount_paid_cents, amount_due_cents,
    currency, status, user_id, email, period_start, period_end,
    payment_intent, created_at
"#;

#[async_trait]
impl InvoiceRepoTrait for PostgresPersistence {
    async fn get_by_invoice_id(&self, invoice_id: &str) -> AppResult<Option<InvoiceProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM invoices WHERE invoice_id = $1",
            SELECT_COLS
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn upsert(&self, invoice: InvoiceUpsert) -> AppResult<InvoiceProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO invoices (
                invoice_id, subscription_id, amount_paid_cents, amount_due_cents,
                currency, status, user_id, email, period_start, period_end, payment_intent
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (invoice_id) DO UPDATE SET
                subscription_id = COALESCE(EXCLUDED.subscription_id, invoices.subscription_id),
                amount_paid_cents =
                    COALESCE(EXCLUDED.amount_paid_cents, invoices.amount_paid_cents),
                amount_due_cents = COALESCE(EXCLUDED.amount_due_cents, invoices.amount_due_cents),
                currency = COALESCE(EXCLUDED.currency, invoices.currency),
                status = EXCLUDED.status,
                user_id = COALESCE(EXCLUDED.user_id, invoices.user_id),
                email = COALESCE(EXCLUDED.email, invoices.email),
                period_start = COALESCE(EXCLUDED.period_start, invoices.period_start),
                period_end = COALESCE(EXCLUDED.period_end, invoices.period_end),
                payment_intent = COALESCE(EXCLUDED.payment_intent, invoices.payment_intent)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(invoice.invoice_id)
        .bind(invoice.subscription_id)
        .bind(invoice.amount_paid_cents)
        .bind(invoice.amount_due_cents)
        .bind(invoice.currency)
        .bind(invoice.status)
        .bind(invoice.user_id)
        .bind(invoice.email)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.payment_intent)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_profile(&row))
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<InvoiceProfile>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            SELECT_COLS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(rows.iter().map(row_to_profile).collect())
    }

    async fn count_by_user(&self, user_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM invoices WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.get("count"))
    }
}
