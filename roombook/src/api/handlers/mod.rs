//! HTTP request handlers for all API endpoints.
//!
//! Each handler is responsible for:
//! - Request validation and deserialization
//! - Authentication via the [`crate::auth::current_user`] extractors
//! - Delegating to the booking engine or repositories
//! - Response serialization
//!
//! # Handler Modules
//!
//! - [`auth`]: OAuth2 login redirect and callback
//! - [`health`]: Health check
//! - [`reservations`]: Create, list and cancel reservations
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching HTTP status and a
//! JSON error body.

pub mod auth;
pub mod health;
pub mod reservations;
