//! Common type definitions shared by the database, booking and API layers.
//!
//! # ID Types
//!
//! All entity IDs are `BIGSERIAL` keys wrapped in type aliases:
//!
//! - [`UserId`]: User account identifier
//! - [`RoomId`]: Meeting room identifier
//! - [`ReservationId`]: Reservation identifier
//!
//! # Roles
//!
//! [`Role`] is the only authorisation input the booking engine consults. Staff can see and cancel
//! every booking and are not bound by the student duration cap.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type UserId = i64;
pub type RoomId = i64;
pub type ReservationId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Student,
    Staff,
}

impl Role {
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Staff)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Staff => "STAFF",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(Role::Student),
            "STAFF" => Ok(Role::Staff),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}
