//! API request and response data models.
//!
//! These models define the public JSON contract and are kept separate from the database row
//! types in [`crate::db::models`], so either side can change without dragging the other along.
//! Request models also own boundary validation: they turn raw input into checked values or an
//! [`Error::Validation`](crate::errors::Error::Validation) listing every offending field.
//!
//! - [`reservations`]: booking requests, listing queries, and the reservation/slot responses

pub mod reservations;
