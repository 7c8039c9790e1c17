//! Pull reconciler - merges server-side changes into the local store
//!
//! Every entity kind is fetched first; the changes are applied in one store
//! transaction only when all fetches succeeded, so a failed pull leaves both
//! the store and the sync mark untouched and is safe to retry.
//!
//! The sync mark advances to the instant the pull *started*, so a change
//! made on the server while the pull was running is picked up next time.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use medsync_core::domain::record::{payload_id, payload_is_tombstone};
use medsync_core::domain::{EntityKind, LocalRecord, PullStats, RecordData};
use medsync_core::ports::{ILocalStore, IRemoteApi, RemoteChange};

use crate::SyncError;

/// Retrieves server changes since the last successful pull
pub struct PullReconciler {
    store: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteApi>,
}

impl PullReconciler {
    pub fn new(store: Arc<dyn ILocalStore>, remote: Arc<dyn IRemoteApi>) -> Self {
        Self { store, remote }
    }

    /// Runs one pull pass
    ///
    /// # Errors
    /// The first remote or store failure; nothing is written in that case.
    #[tracing::instrument(skip(self))]
    pub async fn pull(&self) -> Result<PullStats, SyncError> {
        let started = Utc::now();
        let since = self.store.last_sync_timestamp().await?;
        debug!(?since, "Pulling server changes");

        let mut changes = Vec::new();
        for entity in EntityKind::ALL {
            let records = self.remote.list_changed(entity, since).await?;
            debug!(entity = %entity, count = records.len(), "Fetched changes");
            changes.extend(records.into_iter().filter_map(|data| to_change(entity, data)));
        }

        let stats = self.store.merge_remote(&changes, started).await?;
        info!(%stats, "Pull pass complete");
        Ok(stats)
    }
}

/// Turns one server payload into a store change, skipping malformed ones
fn to_change(entity: EntityKind, data: RecordData) -> Option<RemoteChange> {
    let converted = if payload_is_tombstone(&data) {
        payload_id(&data).map(|id| RemoteChange::Tombstone { entity, id })
    } else {
        LocalRecord::from_server(entity, data).map(RemoteChange::Upsert)
    };

    match converted {
        Ok(change) => Some(change),
        Err(e) => {
            warn!(entity = %entity, error = %e, "Skipping malformed server record");
            None
        }
    }
}
