//! Database models for reservations.

use crate::types::{ReservationId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted reservation state. Cancellation deletes the row, so `Reserved` is the only state a
/// row can be observed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "reservation_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Reserved,
}

/// Database request for creating a reservation
#[derive(Debug, Clone)]
pub struct ReservationCreateDBRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Database response for a reservation row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationDBResponse {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ReservationStatus,
    /// External calendar event, attached asynchronously after creation
    pub gcal_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reservation joined with its room and owner, for listings
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationWithDetails {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub room_name: String,
    pub user_id: UserId,
    pub user_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
