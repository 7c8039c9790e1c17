//! Local store port (driven/secondary port)
//!
//! This module defines the interface for the persistent, transactional
//! store holding record snapshots, the sync queue and sync metadata.
//!
//! ## Design Notes
//!
//! - Every mutating method is one atomic unit: the record write and the
//!   queue change it implies commit together or not at all.
//! - Implementations serialise writers so the mutation gateway and the
//!   reconcilers never interleave partial writes to the same record.
//! - Mutations are expressed as intent (`stage_update`, `confirm_create`)
//!   rather than raw row access, keeping queue folding rules in one place.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    EntityKind, LocalRecord, PullStats, QueueItemId, RecordData, RecordId, SyncQueueItem,
};

// ============================================================================
// StoreError
// ============================================================================

/// Errors surfaced by a local store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No live record with this id exists locally
    #[error("{entity} {id} not found in local store")]
    NotFound { entity: EntityKind, id: RecordId },

    /// The backing store failed
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

// ============================================================================
// Helper types
// ============================================================================

/// What an offline delete did to the local record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The record was never confirmed; it and its queue items are gone
    Purged,
    /// The record is soft-deleted and a delete item is queued
    SoftDeleted,
}

/// One server-side change to merge during a pull
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    /// Current server copy of a record
    Upsert(LocalRecord),
    /// The server deleted this record
    Tombstone { entity: EntityKind, id: RecordId },
}

/// Limits applied by the retention sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPolicy {
    /// Items with more attempts than this are dropped
    pub max_attempts: u32,
    /// Items created before this instant are dropped
    pub created_before: DateTime<Utc>,
}

// ============================================================================
// ILocalStore trait
// ============================================================================

/// Port trait for the local record store and sync queue
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    // --- Reads ---

    /// Retrieves a record by id, including soft-deleted ones
    async fn get_record(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<Option<LocalRecord>, StoreError>;

    /// Lists records of one kind, oldest first
    async fn list_records(
        &self,
        entity: EntityKind,
        include_deleted: bool,
    ) -> Result<Vec<LocalRecord>, StoreError>;

    /// Queue items in FIFO order, optionally restricted to one kind
    async fn queue_items(
        &self,
        entity: Option<EntityKind>,
    ) -> Result<Vec<SyncQueueItem>, StoreError>;

    /// Number of items in the queue
    async fn queue_len(&self) -> Result<u64, StoreError>;

    /// Upper bound of the last successful pull
    async fn last_sync_timestamp(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    // --- Mutation gateway ---

    /// Upserts a server-confirmed record as `synced`
    async fn save_synced(&self, record: &LocalRecord) -> Result<(), StoreError>;

    /// Inserts a pending record and appends its `create` item
    async fn stage_create(&self, record: &LocalRecord) -> Result<QueueItemId, StoreError>;

    /// Applies a patch locally and folds it into the queue
    ///
    /// A patch to an unconfirmed record merges into its queued create. A
    /// patch to a confirmed record merges into its queued update if one
    /// exists, otherwise appends a new update whose `base` holds the
    /// previous values of the patched fields.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if no live record has this id
    async fn stage_update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<LocalRecord, StoreError>;

    /// Deletes a record offline
    ///
    /// Unconfirmed records are purged with their queue items. Confirmed
    /// records are soft-deleted, their queued updates dropped and a delete
    /// item appended.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if no live record has this id
    async fn stage_delete(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Removes a record without touching the queue
    async fn purge_record(&self, entity: EntityKind, id: &RecordId) -> Result<(), StoreError>;

    // --- Push reconciler ---

    /// Promotes an unconfirmed record to its server id
    ///
    /// Inserts `server` as synced, deletes the temp row, rewrites every
    /// reference to `temp_id` in records and queued payloads, then deletes
    /// the queue item.
    ///
    /// `sent` is the payload that was POSTed. Fields patched locally while
    /// the request was in flight are re-queued as an update of the server
    /// id; a record deleted locally meanwhile gets a queued delete.
    async fn confirm_create(
        &self,
        item: QueueItemId,
        temp_id: &RecordId,
        sent: &RecordData,
        server: &LocalRecord,
    ) -> Result<(), StoreError>;

    /// Removes an acknowledged update item and stores the server copy
    ///
    /// The record becomes `synced` unless other queue items still target
    /// it. With `sent`, fields patched locally while the request was in
    /// flight stay queued; without it the item is dropped unconditionally,
    /// which is how the server side of a conflict is accepted.
    async fn settle_update(
        &self,
        item: QueueItemId,
        sent: Option<&RecordData>,
        server: &LocalRecord,
    ) -> Result<(), StoreError>;

    /// Removes an acknowledged delete item and purges the record
    async fn confirm_delete(
        &self,
        item: QueueItemId,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<(), StoreError>;

    /// Records a failed attempt on a queue item
    ///
    /// `rejected` marks the item as permanently refused by the server.
    async fn record_failure(
        &self,
        item: QueueItemId,
        error: &str,
        rejected: bool,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Replaces a queue item with a fresh update against the server's state
    async fn requeue_update(
        &self,
        item: QueueItemId,
        patch: &RecordData,
        base: &RecordData,
    ) -> Result<QueueItemId, StoreError>;

    // --- Pull reconciler ---

    /// Merges server changes in one transaction and advances the sync mark
    ///
    /// Pending local records are left untouched.
    async fn merge_remote(
        &self,
        changes: &[RemoteChange],
        synced_at: DateTime<Utc>,
    ) -> Result<PullStats, StoreError>;

    // --- Retention ---

    /// Drops rejected, over-attempted and expired queue items
    ///
    /// Returns the number of dropped items. Records are never touched.
    async fn sweep_queue(&self, policy: SweepPolicy) -> Result<u64, StoreError>;
}
