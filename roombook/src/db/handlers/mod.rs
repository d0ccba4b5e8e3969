//! Repository implementations for database access.
//!
//! Each repository wraps a `&mut PgConnection` (a pooled connection or an open transaction) and
//! implements [`Repository`] plus whatever table-specific queries its callers need.
//!
//! # Available Repositories
//!
//! - [`Users`]: account lookup and find-or-create on login
//! - [`Rooms`]: meeting room lookup
//! - [`Reservations`]: booking rows, the overlap check and the per-room advisory lock
//!
//! # Common Pattern
//!
//! ```ignore
//! use roombook::db::handlers::{Reservations, Repository};
//!
//! let mut tx = pool.begin().await?;
//! let mut repo = Reservations::new(&mut tx);
//! repo.lock_room(room_id).await?;
//! if !repo.exists_overlapping(room_id, start, end).await? {
//!     repo.create(&request).await?;
//! }
//! tx.commit().await?;
//! ```

pub mod repository;
pub mod reservations;
pub mod rooms;
pub mod users;

pub use repository::Repository;
pub use reservations::Reservations;
pub use rooms::Rooms;
pub use users::Users;
