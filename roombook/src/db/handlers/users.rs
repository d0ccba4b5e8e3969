use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::users::{UserCreateDBRequest, UserDBResponse},
};
use crate::types::UserId;

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT id, name, email, role, created_at FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Returns the existing account for this email, or creates one. The stored role is left
    /// untouched for existing accounts.
    #[instrument(skip(self, request), fields(role = %request.role), err)]
    pub async fn find_or_create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        if let Some(user) = self.get_user_by_email(&request.email).await? {
            return Ok(user);
        }

        // A concurrent login for the same email may win the insert; fall back to reading it.
        let inserted = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (name, email, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
            RETURNING id, name, email, role, created_at
            "#,
        )
        .bind(&request.name)
        .bind(&request.email)
        .bind(request.role)
        .fetch_optional(&mut *self.db)
        .await?;

        match inserted {
            Some(user) => Ok(user),
            None => self.get_user_by_email(&request.email).await?.ok_or(crate::db::errors::DbError::NotFound),
        }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;

    #[instrument(skip(self, request), fields(role = %request.role), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (name, email, role)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, role, created_at
            "#,
        )
        .bind(&request.name)
        .bind(&request.email)
        .bind(request.role)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT id, name, email, role, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }
}
