use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::{
    errors::Result,
    handlers::repository::Repository,
    models::reservations::{ReservationCreateDBRequest, ReservationDBResponse, ReservationStatus, ReservationWithDetails},
};
use crate::types::{ReservationId, RoomId};

/// First key of the two-key advisory lock space used for per-room booking locks.
const ROOM_LOCK_CLASS: i32 = 0x524f_4f4d; // "ROOM"

const RESERVATION_COLUMNS: &str = "id, room_id, user_id, start_time, end_time, status, gcal_event_id, created_at";

pub struct Reservations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Reservations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Serialise bookers of `room_id` until the surrounding transaction ends.
    ///
    /// Must be called inside a transaction. Room ids that collide in the 32-bit key space only
    /// serialise each other more than necessary.
    #[instrument(skip(self), err)]
    pub async fn lock_room(&mut self, room_id: RoomId) -> Result<()> {
        let key = (room_id.rem_euclid(i32::MAX as i64)) as i32;
        sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(ROOM_LOCK_CLASS)
            .bind(key)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    /// Whether any reservation on `room_id` overlaps the half-open interval `[start, end)`.
    #[instrument(skip(self), err)]
    pub async fn exists_overlapping(&mut self, room_id: RoomId, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reservations
                WHERE room_id = $1
                  AND start_time < $2
                  AND end_time > $3
            )
            "#,
        )
        .bind(room_id)
        .bind(end)
        .bind(start)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(exists)
    }

    /// Every reservation intersecting `[start, end)`, with room and owner names, ordered by room
    /// then start time.
    #[instrument(skip(self), err)]
    pub async fn list_between(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<ReservationWithDetails>> {
        let rows = sqlx::query_as::<_, ReservationWithDetails>(
            r#"
            SELECT r.id, r.room_id, rm.name AS room_name, r.user_id, u.name AS user_name,
                   r.start_time, r.end_time
            FROM reservations r
            JOIN rooms rm ON rm.id = r.room_id
            JOIN users u ON u.id = r.user_id
            WHERE r.start_time < $2
              AND r.end_time > $1
            ORDER BY r.room_id, r.start_time
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows)
    }

    /// Attach the external calendar event id. Returns false if the reservation is gone.
    #[instrument(skip(self, event_id), err)]
    pub async fn set_external_event_id(&mut self, id: ReservationId, event_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE reservations SET gcal_event_id = $2 WHERE id = $1")
            .bind(id)
            .bind(event_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Reservations<'c> {
    type CreateRequest = ReservationCreateDBRequest;
    type Response = ReservationDBResponse;
    type Id = ReservationId;

    #[instrument(skip(self, request), fields(room_id = request.room_id, user_id = request.user_id), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let query = format!(
            "INSERT INTO reservations (room_id, user_id, start_time, end_time, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {RESERVATION_COLUMNS}"
        );
        let reservation = sqlx::query_as::<_, ReservationDBResponse>(&query)
            .bind(request.room_id)
            .bind(request.user_id)
            .bind(request.start_time)
            .bind(request.end_time)
            .bind(ReservationStatus::Reserved)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(reservation)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let query = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let reservation = sqlx::query_as::<_, ReservationDBResponse>(&query)
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(reservation)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
