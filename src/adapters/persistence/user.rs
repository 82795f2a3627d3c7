use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::Row;
use uuid::Uuid;

use crate::{
    adapters::persistence::PostgresPersistence,
    app_error::{AppError, AppResult},
    application::use_cases::identity::{NewUser, UserProfile, UserRepoTrait},
    domain::entities::user::UserStatus,
};

fn row_to_profile(row: &sqlx::postgres::PgRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        external_id: row.get("external_id"),
        email: row.get("email"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        profile_image_url: row.get("profile_image_url"),
        status: row.get("status"),
        subscription_status: row.get("subscription_status"),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
    }
}

const SELECT_COLS: &str = r#"
    id, external_id, email, first_name, last_name, profile_image_url,
    status, subscription_status, deleted_at, created_at
"#;

#[async_trait]
impl UserRepoTrait for PostgresPersistence {
    async fn get_by_id(&self, id: Uuid) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", SELECT_COLS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn get_by_external_id(&self, external_id: &str) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE external_id = $1",
            SELECT_COLS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn get_by_email(&self, email: &str) -> AppResult<Option<UserProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE email = $1",
            SELECT_COLS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row.as_ref().map(row_to_profile))
    }

    async fn insert(&self, user: NewUser) -> AppResult<UserProfile> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (external_id, email, first_name, last_name, profile_image_url)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(user.external_id)
        .bind(user.email)
        .bind(user.first_name)
        .bind(user.last_name)
        .bind(user.profile_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_profile(&row))
    }

    async fn update_profile(
        &self,
        id: Uuid,
        email: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
        profile_image_url: Option<&str>,
    ) -> AppResult<UserProfile> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                profile_image_url = COALESCE($5, profile_image_url)
            WHERE id = $1
            RETURNING {}
            "#,
            SELECT_COLS
        ))
        .bind(id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(profile_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from)?;
        Ok(row_to_profile(&row))
    }

    async fn adopt_external_id(&self, id: Uuid, external_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET external_id = $2 WHERE id = $1")
            .bind(id)
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: UserStatus,
        deleted_at: Option<NaiveDateTime>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE users SET status = $2, deleted_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status)
            .bind(deleted_at)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    async fn set_subscription_mirror(&self, id: Uuid, status: Option<&str>) -> AppResult<()> {
        sqlx::query("UPDATE users SET subscription_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(AppError::from)?;
        Ok(())
    }
}
