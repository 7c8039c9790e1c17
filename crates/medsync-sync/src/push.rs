//! Push reconciler - replays the sync queue against the server
//!
//! ## Cycle
//!
//! 1. Drop ledger entries whose queue item no longer exists
//! 2. For each entity kind, parents first, re-read its queue items and
//!    replay them oldest first
//! 3. Every item ends the cycle as pushed, conflicted, deferred, skipped or
//!    failed; one failing item never aborts the batch
//!
//! ## Item rules
//!
//! - Items still referencing a temp id are deferred until the parent create
//!   is confirmed (earlier in this cycle or a later one).
//! - Items in their backoff window, rejected items and items held by an open
//!   conflict are skipped.
//! - Updates are checked against the server copy first: a field conflicts
//!   when the server value differs both from the value the client last saw
//!   and from the value the client wants to write.
//! - A 404 on delete counts as success.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use medsync_core::config::SyncConfig;
use medsync_core::domain::record::temp_references;
use medsync_core::domain::{
    EntityKind, LocalRecord, Operation, RecordData, RecordId, SyncConflict, SyncQueueItem,
    SyncStats,
};
use medsync_core::ports::{ILocalStore, IRemoteApi, RemoteError};

use crate::ledger::ConflictLedger;
use crate::SyncError;

/// What happened to one queue item
#[derive(Debug)]
enum ItemOutcome {
    Pushed,
    Conflict,
    Deferred,
    Failed(RemoteError),
}

/// Drains the sync queue against the server
pub struct PushReconciler {
    store: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteApi>,
    ledger: Arc<ConflictLedger>,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl PushReconciler {
    pub fn new(
        store: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteApi>,
        ledger: Arc<ConflictLedger>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            remote,
            ledger,
            backoff_base: Duration::seconds(config.backoff_base_secs as i64),
            backoff_max: Duration::seconds(config.backoff_max_secs as i64),
        }
    }

    /// Runs one push pass over the whole queue
    ///
    /// # Errors
    /// Only local store failures abort the pass; remote failures are
    /// counted per item.
    #[tracing::instrument(skip(self))]
    pub async fn push(&self) -> Result<SyncStats, SyncError> {
        let live: HashSet<_> = self
            .store
            .queue_items(None)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let pruned = self.ledger.retain_operations(&live).await;
        if pruned > 0 {
            debug!(pruned, "Dropped conflicts whose queue item is gone");
        }

        let mut total = SyncStats::default();
        for entity in EntityKind::ALL {
            let stats = self.push_entity(entity).await?;
            if stats != SyncStats::default() {
                debug!(entity = %entity, %stats, "Entity pushed");
            }
            total += stats;
        }

        info!(%total, "Push pass complete");
        Ok(total)
    }

    async fn push_entity(&self, entity: EntityKind) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::default();
        // Records with an unfinished item this pass; later items for them wait
        let mut blocked: HashSet<RecordId> = HashSet::new();
        let now = Utc::now();

        for item in self.store.queue_items(Some(entity)).await? {
            if blocked.contains(&item.entity_id) {
                stats.skipped += 1;
                continue;
            }
            if item.rejected
                || !item.is_due(now, self.backoff_base, self.backoff_max)
                || self.ledger.is_held(item.id).await
            {
                debug!(item = %item.id, attempts = item.attempts, "Skipping queue item");
                blocked.insert(item.entity_id.clone());
                stats.skipped += 1;
                continue;
            }

            match self.push_item(&item).await? {
                ItemOutcome::Pushed => stats.success += 1,
                ItemOutcome::Conflict => {
                    blocked.insert(item.entity_id.clone());
                    stats.conflicts += 1;
                }
                ItemOutcome::Deferred => {
                    blocked.insert(item.entity_id.clone());
                    stats.deferred += 1;
                }
                ItemOutcome::Failed(err) => {
                    let rejected = !err.is_retryable();
                    warn!(
                        item = %item.id,
                        entity = %entity,
                        id = %item.entity_id,
                        operation = %item.operation,
                        error = %err,
                        rejected,
                        "Push failed"
                    );
                    self.store
                        .record_failure(item.id, &err.to_string(), rejected, Utc::now())
                        .await?;
                    blocked.insert(item.entity_id.clone());
                    stats.errors += 1;
                }
            }
        }

        Ok(stats)
    }

    async fn push_item(&self, item: &SyncQueueItem) -> Result<ItemOutcome, SyncError> {
        let data = item.data.clone().unwrap_or_default();
        if item.operation != Operation::Delete {
            let pending = temp_references(item.entity, &data);
            if !pending.is_empty() {
                debug!(item = %item.id, references = ?pending, "Deferring until parent is confirmed");
                return Ok(ItemOutcome::Deferred);
            }
        }

        match item.operation {
            Operation::Create => self.push_create(item, data).await,
            Operation::Update => self.push_update(item, data).await,
            Operation::Delete => self.push_delete(item).await,
        }
    }

    async fn push_create(
        &self,
        item: &SyncQueueItem,
        mut sent: RecordData,
    ) -> Result<ItemOutcome, SyncError> {
        sent.remove("id");
        let server = match self.remote.create(item.entity, &sent).await {
            Ok(data) => data,
            Err(e) => return Ok(ItemOutcome::Failed(e)),
        };
        let record = match LocalRecord::from_server(item.entity, server) {
            Ok(record) => record,
            Err(e) => return Ok(ItemOutcome::Failed(RemoteError::InvalidResponse(e.to_string()))),
        };

        self.store
            .confirm_create(item.id, &item.entity_id, &sent, &record)
            .await?;
        info!(entity = %item.entity, temp_id = %item.entity_id, id = %record.id, "Create confirmed");
        Ok(ItemOutcome::Pushed)
    }

    async fn push_update(
        &self,
        item: &SyncQueueItem,
        patch: RecordData,
    ) -> Result<ItemOutcome, SyncError> {
        let current = match self.remote.fetch(item.entity, &item.entity_id).await {
            Ok(data) => data,
            Err(e) => return Ok(ItemOutcome::Failed(e)),
        };

        let fields = diverging_fields(&patch, item.base.as_ref(), &current);
        if !fields.is_empty() {
            let temp_id = self
                .store
                .get_record(item.entity, &item.entity_id)
                .await?
                .and_then(|record| record.temp_id);
            let conflict = SyncConflict::new(
                item.id,
                item.entity,
                item.entity_id.clone(),
                patch,
                current,
                fields,
            )
            .with_temp_id(temp_id);
            warn!(
                item = %item.id,
                entity = %item.entity,
                id = %item.entity_id,
                fields = ?conflict.fields(),
                "Server copy diverged, holding update"
            );
            self.ledger.record(conflict).await;
            return Ok(ItemOutcome::Conflict);
        }

        let server = match self.remote.update(item.entity, &item.entity_id, &patch).await {
            Ok(data) => data,
            Err(e) => return Ok(ItemOutcome::Failed(e)),
        };
        let record = match LocalRecord::from_server(item.entity, server) {
            Ok(record) => record,
            Err(e) => return Ok(ItemOutcome::Failed(RemoteError::InvalidResponse(e.to_string()))),
        };

        self.store.settle_update(item.id, Some(&patch), &record).await?;
        debug!(entity = %item.entity, id = %item.entity_id, "Update confirmed");
        Ok(ItemOutcome::Pushed)
    }

    async fn push_delete(&self, item: &SyncQueueItem) -> Result<ItemOutcome, SyncError> {
        match self.remote.delete(item.entity, &item.entity_id).await {
            Ok(()) => {}
            Err(RemoteError::NotFound) => {
                debug!(entity = %item.entity, id = %item.entity_id, "Already deleted on server");
            }
            Err(e) => return Ok(ItemOutcome::Failed(e)),
        }

        self.store
            .confirm_delete(item.id, item.entity, &item.entity_id)
            .await?;
        debug!(entity = %item.entity, id = %item.entity_id, "Delete confirmed");
        Ok(ItemOutcome::Pushed)
    }
}

/// Fields of `patch` the server changed behind the client's back
///
/// A field diverges when the server value differs from `base` (what the
/// client last saw) and from the patch value. Without a base nothing can
/// diverge.
pub fn diverging_fields(
    patch: &RecordData,
    base: Option<&RecordData>,
    server: &RecordData,
) -> Vec<String> {
    let Some(base) = base else {
        return Vec::new();
    };

    patch
        .iter()
        .filter(|(field, _)| field.as_str() != "id")
        .filter(|(field, local)| {
            let remote = server.get(field.as_str()).unwrap_or(&Value::Null);
            let expected = base.get(field.as_str()).unwrap_or(&Value::Null);
            remote != expected && remote != *local
        })
        .map(|(field, _)| field.clone())
        .collect()
}
