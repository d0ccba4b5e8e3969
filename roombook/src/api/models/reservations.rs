//! API request/response models for reservations.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{ReservedSlot, RoomSlots};
use crate::config::BookingConfig;
use crate::db::models::reservations::ReservationDBResponse;
use crate::errors::Error;
use crate::types::{ReservationId, RoomId, UserId};

const DATE_FORMAT: &str = "%Y-%m-%d";
const REQUIRED: &str = "This field is required";
const UTC_FORMAT: &str = "Time must be in UTC format (e.g. 2026-02-23T06:00:00Z)";

/// Collects per-field messages; the first message recorded for a field wins.
#[derive(Debug, Default)]
struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_insert_with(|| message.into());
    }

    fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    fn into_result<T>(self, value: impl FnOnce() -> T) -> Result<T, Error> {
        if self.0.is_empty() {
            Ok(value())
        } else {
            Err(Error::Validation {
                message: "validation failed".to_string(),
                fields: self.0,
            })
        }
    }
}

/// Request body for booking a room. Fields are optional so that missing values are reported per
/// field instead of as a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub room_id: Option<RoomId>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// A create request that passed boundary validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidReservationRequest {
    pub room_id: RoomId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl CreateReservationRequest {
    /// Check shape and school-hours rules relative to `now`.
    pub fn validate(&self, now: DateTime<Utc>, booking: &BookingConfig) -> Result<ValidReservationRequest, Error> {
        let mut errors = FieldErrors::default();

        match self.room_id {
            None => errors.add("roomId", REQUIRED),
            Some(id) if id <= 0 => errors.add("roomId", "Must be greater than 0"),
            Some(_) => {}
        }

        let start = parse_utc("startTime", self.start_time.as_deref(), &mut errors);
        let end = parse_utc("endTime", self.end_time.as_deref(), &mut errors);

        if let Some(start) = start {
            if start <= now {
                errors.add("startTime", "Time must be in the future");
            }
            if !within_school_hours(start, booking, false) {
                errors.add("startTime", school_hours_message(booking));
            }
        }

        if let Some(end) = end {
            if start.is_some_and(|start| end <= start) && !errors.has("startTime") {
                errors.add("endTime", "Must be after startTime");
            }
            if !within_school_hours(end, booking, true) {
                errors.add("endTime", school_hours_message(booking));
            }
        }

        errors.into_result(|| ValidReservationRequest {
            room_id: self.room_id.unwrap_or_default(),
            start_time: start.unwrap_or(now),
            end_time: end.unwrap_or(now),
        })
    }
}

fn parse_utc(field: &str, raw: Option<&str>, errors: &mut FieldErrors) -> Option<DateTime<Utc>> {
    let raw = match raw.map(str::trim) {
        None | Some("") => {
            errors.add(field, REQUIRED);
            return None;
        }
        Some(raw) => raw,
    };

    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) if parsed.offset().local_minus_utc() == 0 => Some(parsed.with_timezone(&Utc)),
        _ => {
            errors.add(field, UTC_FORMAT);
            None
        }
    }
}

/// Whether `at` falls inside opening hours in the booking time zone. An end time may land exactly
/// on closing time.
fn within_school_hours(at: DateTime<Utc>, booking: &BookingConfig, is_end: bool) -> bool {
    let local = at.with_timezone(&booking.timezone);
    let hour = local.hour();

    if hour >= booking.opening_hour && hour < booking.closing_hour {
        return true;
    }
    is_end && hour == booking.closing_hour && local.minute() == 0 && local.second() == 0
}

fn school_hours_message(booking: &BookingConfig) -> String {
    format!(
        "Time must be between {} and {}",
        twelve_hour(booking.opening_hour),
        twelve_hour(booking.closing_hour)
    )
}

fn twelve_hour(hour: u32) -> String {
    let suffix = if hour % 24 < 12 { "AM" } else { "PM" };
    let display = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{display}:00 {suffix}")
}

/// Query parameters for listing reservations
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListReservationsQuery {
    /// First day, `YYYY-MM-DD`
    pub start: Option<String>,
    /// Last day (inclusive), `YYYY-MM-DD`
    pub end: Option<String>,
}

impl ListReservationsQuery {
    pub fn validate(&self, max_range_days: i64) -> Result<(NaiveDate, NaiveDate), Error> {
        let mut errors = FieldErrors::default();

        let start = parse_date("start", "Start date", self.start.as_deref(), &mut errors);
        let end = parse_date("end", "End date", self.end.as_deref(), &mut errors);

        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                errors.add("end", "End date must not be before start date");
            } else if (end - start).num_days() > max_range_days {
                errors.add("end", format!("Date range cannot exceed {max_range_days} days"));
            }
        }

        errors.into_result(|| (start.unwrap_or_default(), end.unwrap_or_default()))
    }
}

fn parse_date(field: &str, label: &str, raw: Option<&str>, errors: &mut FieldErrors) -> Option<NaiveDate> {
    let raw = match raw.map(str::trim) {
        None | Some("") => {
            errors.add(field, format!("{label} is required"));
            return None;
        }
        Some(raw) => raw,
    };

    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add(field, format!("Invalid {} format, expected YYYY-MM-DD", label.to_lowercase()));
            None
        }
    }
}

/// Parse a reservation id from the request path.
pub fn parse_reservation_id(raw: &str) -> Result<ReservationId, Error> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::invalid_field("id", "Reservation ID is required"));
    }
    let id: ReservationId = raw
        .parse()
        .map_err(|_| Error::invalid_field("id", "Reservation ID must be a valid number"))?;
    if id <= 0 {
        return Err(Error::invalid_field("id", "Must be greater than 0"));
    }
    Ok(id)
}

/// Owner reference embedded in a created reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    #[serde(rename = "Id")]
    pub id: UserId,
    pub name: String,
}

/// The reservation returned by `POST /api/v1/reservations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    #[serde(rename = "Id")]
    pub id: ReservationId,
    pub room_id: RoomId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_by: UserRef,
}

impl ReservationResponse {
    pub fn new(reservation: ReservationDBResponse, owner_name: String) -> Self {
        Self {
            id: reservation.id,
            room_id: reservation.room_id,
            start_time: reservation.start_time,
            end_time: reservation.end_time,
            created_by: UserRef {
                id: reservation.user_id,
                name: owner_name,
            },
        }
    }
}

/// One booked slot in a listing. `bookedBy` is omitted unless the caller may see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotResponse {
    pub id: ReservationId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<String>,
}

impl From<ReservedSlot> for SlotResponse {
    fn from(slot: ReservedSlot) -> Self {
        Self {
            id: slot.id,
            start_time: slot.start_time,
            end_time: slot.end_time,
            booked_by: slot.booked_by,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomSlotsResponse {
    pub room_id: RoomId,
    pub room_name: String,
    pub slots: Vec<SlotResponse>,
}

impl From<RoomSlots> for RoomSlotsResponse {
    fn from(room: RoomSlots) -> Self {
        Self {
            room_id: room.room_id,
            room_name: room.room_name,
            slots: room.slots.into_iter().map(SlotResponse::from).collect(),
        }
    }
}
