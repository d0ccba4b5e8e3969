//! Base repository trait for database operations.

use crate::db::errors::Result;

/// Base repository trait providing common database operations.
///
/// A repository is a data access layer for one postgres table. Table-specific queries (overlap
/// overlap checks, lookups by email, ...) live as inherent methods on the implementing struct.
#[async_trait::async_trait]
pub trait Repository {
    /// The request type for creating entities
    type CreateRequest;

    /// The response/DTO type returned by operations
    type Response;

    /// The identifier type for lookups
    type Id: Send + Sync;

    /// Create a new entity
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    /// Get an entity by ID
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    /// Delete an entity by ID, returning whether a row was removed
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;
}
