//! Domain entities and business logic
//!
//! This module contains the core domain types for MedSync:
//! - Newtypes for record, queue item and conflict identifiers
//! - The entity descriptor shared by every clinic record type
//! - Local records with their sync bookkeeping
//! - Outbox (sync queue) items
//! - Sync conflicts and resolutions
//! - Reconciliation statistics
//! - Domain-specific error types

pub mod conflict;
pub mod entity;
pub mod errors;
pub mod newtypes;
pub mod queue;
pub mod record;
pub mod stats;

// Re-export commonly used types
pub use conflict::{Resolution, SyncConflict};
pub use entity::{EntityKind, Reference};
pub use errors::DomainError;
pub use newtypes::*;
pub use queue::{Operation, SyncQueueItem};
pub use record::{LocalRecord, RecordData, SyncStatus};
pub use stats::{PullStats, SyncReport, SyncStats};
