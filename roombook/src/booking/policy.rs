//! Pure booking rules: duration limits and who may see or cancel what.
//!
//! Interval overlap is evaluated in SQL by [`crate::db::handlers::Reservations::exists_overlapping`].

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::types::{Role, UserId};

/// Whether `role` may not hold a booking this long. Only students are capped.
pub fn exceeds_max_duration(role: Role, start: DateTime<Utc>, end: DateTime<Utc>, student_max: Duration) -> bool {
    if role.is_staff() {
        return false;
    }
    match (end - start).to_std() {
        Ok(duration) => duration > student_max,
        // Negative durations are rejected before this point
        Err(_) => false,
    }
}

/// Whether the caller may see who booked a slot owned by `owner`.
pub fn can_see_owner(caller_id: Option<UserId>, caller_role: Option<Role>, owner: UserId) -> bool {
    caller_role.is_some_and(Role::is_staff) || caller_id == Some(owner)
}

/// Whether the caller may cancel a reservation owned by `owner`.
pub fn can_cancel(caller_id: UserId, caller_role: Role, owner: UserId) -> bool {
    caller_role.is_staff() || caller_id == owner
}
