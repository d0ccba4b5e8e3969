use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::rooms::{RoomCreateDBRequest, RoomDBResponse},
};
use crate::types::RoomId;

pub struct Rooms<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Rooms<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Rooms<'c> {
    type CreateRequest = RoomCreateDBRequest;
    type Response = RoomDBResponse;
    type Id = RoomId;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let room = sqlx::query_as::<_, RoomDBResponse>("INSERT INTO rooms (name) VALUES ($1) RETURNING id, name")
            .bind(&request.name)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(room)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let room = sqlx::query_as::<_, RoomDBResponse>("SELECT id, name FROM rooms WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(room)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1").bind(id).execute(&mut *self.db).await?;

        Ok(result.rows_affected() > 0)
    }
}
