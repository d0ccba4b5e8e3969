//! Database models for meeting rooms.

use crate::types::RoomId;

#[derive(Debug, Clone)]
pub struct RoomCreateDBRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RoomDBResponse {
    pub id: RoomId,
    pub name: String,
}
