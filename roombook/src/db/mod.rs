//! Database layer for data persistence and access.
//!
//! This module implements the persistence gateway using SQLx with PostgreSQL, following the
//! Repository pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   Booking   │  (booking engine, auth)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! # Transactions
//!
//! Reads can run on a pooled connection. Anything that must observe and modify state atomically
//! (the booking check-and-insert) runs in a transaction opened by [`begin_with_isolation`]:
//!
//! ```ignore
//! let mut tx = db::begin_with_isolation(&pool, IsolationLevel::ReadCommitted).await?;
//! let mut repo = Reservations::new(&mut tx);
//! // ... operations ...
//! tx.commit().await?;
//! ```
//!
//! Queries are built at runtime with `sqlx::query_as` so the crate builds without a live
//! database or an offline query cache.

pub mod errors;
pub mod handlers;
pub mod models;

use sqlx::{PgPool, Postgres, Transaction, postgres::PgPoolOptions};
use tracing::instrument;

use crate::config::{DatabaseConfig, IsolationLevel};
use errors::Result;

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Open a transaction at the requested isolation level.
#[instrument(skip(pool), err)]
pub async fn begin_with_isolation(pool: &PgPool, isolation: IsolationLevel) -> Result<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;
    sqlx::query(isolation.as_sql()).execute(&mut *tx).await?;
    Ok(tx)
}

/// Connect a pool using the configured limits.
pub async fn connect(url: &str, settings: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(url)
        .await?;

    Ok(pool)
}
