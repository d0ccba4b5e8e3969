//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Reservations** (`/api/v1/reservations`): Book, list and cancel room reservations
//! - **Health** (`/api/v1/health`): Liveness plus a database check
//! - **Login** (`/oauth/login`, `/oauth/callback`): OAuth2 sign-in with the campus provider
//!
//! Reservation and login routes sit behind per-client rate limiters; see [`crate::limits`].

pub mod handlers;
pub mod models;
