//! Conflict ledger - open conflicts and their resolution
//!
//! The push reconciler records a [`SyncConflict`] when a queued update
//! would overwrite a server change. The conflicting queue item is held until
//! the conflict is resolved or the ledger is cleared.
//!
//! Observers subscribe to the open-conflict count instead of polling.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use medsync_core::domain::{
    record::merge_into, ConflictId, LocalRecord, QueueItemId, RecordData, Resolution,
    SyncConflict,
};
use medsync_core::ports::ILocalStore;

use crate::SyncError;

/// In-memory set of unresolved conflicts
pub struct ConflictLedger {
    store: Arc<dyn ILocalStore>,
    entries: RwLock<Vec<SyncConflict>>,
    count: watch::Sender<usize>,
}

impl ConflictLedger {
    pub fn new(store: Arc<dyn ILocalStore>) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            store,
            entries: RwLock::new(Vec::new()),
            count,
        }
    }

    /// Receiver of the open-conflict count
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Open conflicts, oldest first
    pub async fn snapshot(&self) -> Vec<SyncConflict> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Returns true if the queue item is held by an open conflict
    pub async fn is_held(&self, operation: QueueItemId) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|c| c.operation_id() == operation)
    }

    /// Adds a conflict, replacing any earlier one for the same queue item
    pub async fn record(&self, conflict: SyncConflict) {
        let mut entries = self.entries.write().await;
        entries.retain(|c| c.operation_id() != conflict.operation_id());
        entries.push(conflict);
        self.publish(entries.len());
    }

    /// Keeps only conflicts whose queue item is in `live`
    ///
    /// Returns the number of dropped entries.
    pub async fn retain_operations(&self, live: &HashSet<QueueItemId>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|c| live.contains(&c.operation_id()));
        let dropped = before - entries.len();
        if dropped > 0 {
            self.publish(entries.len());
        }
        dropped
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Settles one conflict
    ///
    /// - [`Resolution::Server`]: adopt the server copy as captured when the
    ///   conflict was detected and drop the conflicting fields. Edits made
    ///   after detection stay queued. A server change newer than the
    ///   capture arrives with the next pull.
    /// - [`Resolution::Client`]: re-queue the held item's current payload as
    ///   a fresh update whose base is the server's values.
    ///
    /// # Errors
    /// [`SyncError::ConflictNotFound`] if `id` is not open
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, id: ConflictId, resolution: Resolution) -> Result<(), SyncError> {
        let conflict = self
            .entries
            .read()
            .await
            .iter()
            .find(|c| c.id() == id)
            .cloned()
            .ok_or(SyncError::ConflictNotFound(id))?;

        self.apply(&conflict, resolution).await?;

        let mut entries = self.entries.write().await;
        entries.retain(|c| c.id() != id);
        self.publish(entries.len());
        Ok(())
    }

    /// Settles every open conflict the same way
    ///
    /// Returns the number of resolved conflicts.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_all(&self, resolution: Resolution) -> Result<usize, SyncError> {
        let open = self.snapshot().await;
        for conflict in &open {
            self.resolve(conflict.id(), resolution).await?;
        }
        if !open.is_empty() {
            info!(count = open.len(), %resolution, "Resolved all conflicts");
        }
        Ok(open.len())
    }

    /// Discards every open conflict without touching the store or queue
    ///
    /// The held queue items are pushed again on the next cycle.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let cleared = entries.len();
        entries.clear();
        self.publish(0);
        if cleared > 0 {
            info!(cleared, "Conflict ledger cleared");
        }
        cleared
    }

    async fn apply(&self, conflict: &SyncConflict, resolution: Resolution) -> Result<(), SyncError> {
        let held = self
            .store
            .queue_items(Some(conflict.entity()))
            .await?
            .into_iter()
            .find(|item| item.id == conflict.operation_id());
        let Some(held) = held else {
            warn!(
                conflict = %conflict.id(),
                item = %conflict.operation_id(),
                "Queue item already gone, dropping conflict"
            );
            return Ok(());
        };

        match resolution {
            Resolution::Server => {
                // Edits folded into the held item after detection survive as
                // a fresh update on top of the server copy
                let remote = LocalRecord::from_server(conflict.entity(), conflict.remote().clone())?;
                self.store
                    .settle_update(conflict.operation_id(), Some(conflict.local()), &remote)
                    .await?;
            }
            Resolution::Client => {
                let patch = pending_patch(conflict.local(), held.data.as_ref());
                let base = current_values(&patch, conflict.remote());
                let item = self
                    .store
                    .requeue_update(conflict.operation_id(), &patch, &base)
                    .await?;
                info!(item = %item, "Re-queued local values on top of server copy");
            }
        }

        info!(
            entity = %conflict.entity(),
            id = %conflict.record_id(),
            %resolution,
            "Conflict resolved"
        );
        Ok(())
    }

    fn publish(&self, count: usize) {
        self.count.send_if_modified(|current| {
            let changed = *current != count;
            *current = count;
            changed
        });
    }
}

/// Local values to push: the conflicting patch overlaid with the held
/// item's current payload, which includes edits made after detection
fn pending_patch(conflicting: &RecordData, held: Option<&RecordData>) -> RecordData {
    let mut patch = conflicting.clone();
    if let Some(held) = held {
        merge_into(&mut patch, held);
    }
    patch.remove("id");
    patch
}

/// The server's value for every field of `patch`, `null` where absent
fn current_values(patch: &RecordData, server: &RecordData) -> RecordData {
    patch
        .keys()
        .map(|field| (field.clone(), server.get(field).cloned().unwrap_or(Value::Null)))
        .collect()
}
