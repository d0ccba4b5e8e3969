use std::collections::BTreeMap;
use std::time::Duration;

use crate::db::errors::DbError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error as ThisError;

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Booking target does not exist
    #[error("room not found")]
    RoomNotFound,

    /// Reservation to cancel does not exist
    #[error("reservation not found")]
    ReservationNotFound,

    /// Another live reservation overlaps the requested interval. Says nothing about who holds it.
    #[error("this time slot is already booked")]
    TimeSlotTaken,

    /// Student booking longer than the configured maximum
    #[error("reservation exceeds maximum allowed duration")]
    ExceedsMaxDuration,

    /// Caller is neither the owner nor staff
    #[error("unauthorized to cancel this reservation")]
    UnauthorizedCancellation,

    /// The acting user could not be loaded
    #[error("failed to get User")]
    GetUserFailed,

    /// Listing reservations failed at the persistence layer
    #[error("failed to fetch reservations")]
    ReservationFetchFailed,

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Authenticated but not allowed
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// Field-level validation failure
    #[error("{message}: {fields:?}")]
    Validation {
        message: String,
        fields: BTreeMap<String, String>,
    },

    /// Client is over its request budget
    #[error("Too many requests")]
    TooManyRequests { retry_after: Duration },

    /// A third-party dependency (identity provider) failed or timed out
    #[error("Upstream failure: {operation}")]
    Upstream { operation: String, timed_out: bool },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<BTreeMap<String, String>>,
}

impl Error {
    /// Single-field validation failure.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), message.into());
        Error::Validation {
            message: "validation failed".to_string(),
            fields,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::RoomNotFound | Error::ReservationNotFound => StatusCode::NOT_FOUND,
            Error::TimeSlotTaken => StatusCode::CONFLICT,
            Error::ExceedsMaxDuration => StatusCode::BAD_REQUEST,
            Error::UnauthorizedCancellation => StatusCode::FORBIDDEN,
            Error::GetUserFailed | Error::ReservationFetchFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } | Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Upstream { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Upstream { timed_out: false, .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::SerializationFailure { .. } => StatusCode::CONFLICT,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::RoomNotFound
            | Error::ReservationNotFound
            | Error::TimeSlotTaken
            | Error::ExceedsMaxDuration
            | Error::UnauthorizedCancellation
            | Error::GetUserFailed
            | Error::ReservationFetchFailed => self.to_string(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "unauthorized".to_string()),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::Validation { message, .. } => message.clone(),
            Error::TooManyRequests { .. } => RATE_LIMIT_MESSAGE.to_string(),
            Error::Upstream { operation, .. } => operation.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::SerializationFailure { .. } => "Concurrent update detected, please retry".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_))
            | Error::Internal { .. }
            | Error::Other(_)
            | Error::GetUserFailed
            | Error::ReservationFetchFailed
            | Error::Upstream { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Forbidden { .. } | Error::UnauthorizedCancellation => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::TooManyRequests { .. } => {}
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();

        match self {
            Error::TooManyRequests { retry_after } => {
                let mut response = (status, RATE_LIMIT_MESSAGE).into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().max(1).to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
            Error::Validation { message, fields } => {
                let body = ErrorBody {
                    error: message,
                    details: Some(fields),
                };
                (status, Json(body)).into_response()
            }
            other => {
                let body = ErrorBody {
                    error: other.user_message(),
                    details: None,
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
