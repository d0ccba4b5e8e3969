//! Database record structures matching table schemas.
//!
//! Create requests carry only what the caller supplies; responses derive [`sqlx::FromRow`] and
//! mirror the table columns.

pub mod reservations;
pub mod rooms;
pub mod users;
