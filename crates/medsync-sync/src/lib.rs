//! MedSync Sync - Offline synchronization engine
//!
//! Provides:
//! - Server reachability tracking
//! - Online/offline mutation routing with a durable outbox
//! - Queue replay with temp-id remapping and conflict detection
//! - Incremental pull of server changes
//! - Scheduled and event-driven sync cycles
//!
//! ## Modules
//!
//! - [`connectivity`] - Probe-backed online/offline signal
//! - [`gateway`] - Entry point for create/update/delete from the UI
//! - [`push`] - Replays the sync queue against the server
//! - [`pull`] - Merges server-side changes into the local store
//! - [`ledger`] - Open conflicts and their resolution
//! - [`sweeper`] - Drops unrecoverable queue items
//! - [`orchestrator`] - Full sync cycles and automatic triggers

pub mod connectivity;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod pull;
pub mod push;
pub mod sweeper;

use thiserror::Error;

use medsync_core::domain::{ConflictId, DomainError, EntityKind, RecordId};
use medsync_core::ports::{RemoteError, StoreError};

/// Errors surfaced by the sync engine to its callers
#[derive(Debug, Error)]
pub enum SyncError {
    /// The record does not exist (or is already deleted)
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: RecordId },

    /// The server refused the mutation; retrying will not help
    #[error("Server rejected {entity} mutation: {source}")]
    Rejected {
        entity: EntityKind,
        #[source]
        source: RemoteError,
    },

    /// A remote call failed during a pull
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The conflict is not (or no longer) in the ledger
    #[error("Conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    /// A payload failed domain validation
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// The local store failed
    #[error("Local store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::Store(other),
        }
    }
}
