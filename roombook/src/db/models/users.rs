//! Database models for users.

use crate::types::{Role, UserId};
use chrono::{DateTime, Utc};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Database response for a user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}
