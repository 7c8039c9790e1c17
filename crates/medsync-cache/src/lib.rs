//! MedSync Cache - Local record store
//!
//! SQLite-based persistence for:
//! - Record snapshots, one table per entity kind
//! - The sync queue (outbox)
//! - Sync metadata (`last_sync_timestamp`)
//!
//! ## Architecture
//!
//! This crate implements the `ILocalStore` port from `medsync-core`
//! using SQLite as the storage backend. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteLocalStore`] - Full `ILocalStore` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use medsync_cache::{DatabasePool, SqliteLocalStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/medsync/medsync.db")).await?;
//! let store = SqliteLocalStore::new(pool.pool().clone());
//! // Use store as ILocalStore...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod store;

use medsync_core::domain::{EntityKind, RecordId};
use medsync_core::ports::StoreError;

pub use pool::DatabasePool;
pub use store::SqliteLocalStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The targeted record does not exist or is soft-deleted
    #[error("{entity} {id} not found")]
    RecordNotFound { entity: EntityKind, id: RecordId },

    /// A queue item vanished between read and write
    #[error("queue item {0} not found")]
    QueueItemNotFound(i64),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<CacheError> for StoreError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::RecordNotFound { entity, id } => StoreError::NotFound { entity, id },
            other => StoreError::Backend(anyhow::Error::new(other)),
        }
    }
}
