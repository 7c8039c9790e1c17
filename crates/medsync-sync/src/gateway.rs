//! Mutation gateway - routes UI mutations online or into the outbox
//!
//! One [`MutationGateway`] serves every entity kind; the kind only selects
//! the local table and the REST endpoint.
//!
//! ## Routing
//!
//! | State                                   | Path                        |
//! |-----------------------------------------|-----------------------------|
//! | offline                                 | local write + queue append  |
//! | online, record pending or unconfirmed   | local write + queue append  |
//! | online, payload references a temp id    | local write + queue append  |
//! | online, otherwise                       | direct server call          |
//!
//! A direct call that fails with a retryable error falls back to the
//! offline path. A client error (4xx) is returned to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use medsync_core::domain::record::temp_references;
use medsync_core::domain::{EntityKind, LocalRecord, RecordData, RecordId};
use medsync_core::ports::{DeleteOutcome, IConnectivity, ILocalStore, IRemoteApi, RemoteError};

use crate::SyncError;

/// Produces temp ids for offline creates
pub type TempIdSource = Arc<dyn Fn() -> RecordId + Send + Sync>;

/// Entry point for create/update/delete and local reads
pub struct MutationGateway {
    store: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteApi>,
    connectivity: Arc<dyn IConnectivity>,
    temp_ids: TempIdSource,
}

impl MutationGateway {
    pub fn new(
        store: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteApi>,
        connectivity: Arc<dyn IConnectivity>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            temp_ids: Arc::new(RecordId::new_temp),
        }
    }

    /// Replaces the temp id generator
    pub fn with_temp_ids(mut self, temp_ids: TempIdSource) -> Self {
        self.temp_ids = temp_ids;
        self
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Creates a record
    ///
    /// Online the server copy is returned; offline the optimistic local
    /// record carrying a temp id is returned.
    #[tracing::instrument(skip(self, payload))]
    pub async fn create(
        &self,
        entity: EntityKind,
        mut payload: RecordData,
    ) -> Result<LocalRecord, SyncError> {
        payload.remove("id");

        if self.connectivity.is_online() && temp_references(entity, &payload).is_empty() {
            match self.remote.create(entity, &payload).await {
                Ok(data) => {
                    let record = LocalRecord::from_server(entity, data)?;
                    self.store.save_synced(&record).await?;
                    info!(id = %record.id, "Created online");
                    return Ok(record);
                }
                Err(e) => self.fall_back(entity, e)?,
            }
        }

        let record =
            LocalRecord::new_offline_with_id(entity, payload, (self.temp_ids)(), Utc::now());
        let item = self.store.stage_create(&record).await?;
        info!(id = %record.id, item = %item, "Queued offline create");
        Ok(record)
    }

    /// Applies a partial update
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        mut patch: RecordData,
    ) -> Result<LocalRecord, SyncError> {
        patch.remove("id");
        let existing = self.live_record(entity, id).await?;

        let direct = match &existing {
            Some(record) => !record.is_pending() && !record.is_unconfirmed(),
            None => !id.is_temp(),
        };
        if direct && self.connectivity.is_online() && temp_references(entity, &patch).is_empty() {
            match self.remote.update(entity, id, &patch).await {
                Ok(data) => {
                    let record = LocalRecord::from_server(entity, data)?;
                    self.store.save_synced(&record).await?;
                    info!("Updated online");
                    return Ok(record);
                }
                Err(RemoteError::NotFound) => {
                    return Err(SyncError::NotFound {
                        entity,
                        id: id.clone(),
                    })
                }
                Err(e) => self.fall_back(entity, e)?,
            }
        }

        if existing.is_none() {
            return Err(SyncError::NotFound {
                entity,
                id: id.clone(),
            });
        }
        let record = self.store.stage_update(entity, id, &patch).await?;
        info!(pending = record.is_pending(), "Queued offline update");
        Ok(record)
    }

    /// Deletes a record
    ///
    /// Returns [`DeleteOutcome::Purged`] when the record is gone locally and
    /// [`DeleteOutcome::SoftDeleted`] when the delete awaits a push.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<DeleteOutcome, SyncError> {
        let existing = self.live_record(entity, id).await?;

        let direct = match &existing {
            Some(record) => !record.is_pending() && !record.is_unconfirmed(),
            None => !id.is_temp(),
        };
        if direct && self.connectivity.is_online() {
            match self.remote.delete(entity, id).await {
                Ok(()) | Err(RemoteError::NotFound) => {
                    self.store.purge_record(entity, id).await?;
                    info!("Deleted online");
                    return Ok(DeleteOutcome::Purged);
                }
                Err(e) => self.fall_back(entity, e)?,
            }
        }

        if existing.is_none() {
            return Err(SyncError::NotFound {
                entity,
                id: id.clone(),
            });
        }
        let outcome = self.store.stage_delete(entity, id).await?;
        info!(?outcome, "Staged offline delete");
        Ok(outcome)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Live records of one kind, oldest first
    pub async fn list(&self, entity: EntityKind) -> Result<Vec<LocalRecord>, SyncError> {
        Ok(self.store.list_records(entity, false).await?)
    }

    /// One record by id, including a soft-deleted one
    pub async fn get(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<Option<LocalRecord>, SyncError> {
        Ok(self.store.get_record(entity, id).await?)
    }

    async fn live_record(
        &self,
        entity: EntityKind,
        id: &RecordId,
    ) -> Result<Option<LocalRecord>, SyncError> {
        Ok(self
            .store
            .get_record(entity, id)
            .await?
            .filter(|record| !record.is_deleted))
    }

    /// Decides whether a failed direct call may continue offline
    fn fall_back(&self, entity: EntityKind, err: RemoteError) -> Result<(), SyncError> {
        if err.is_retryable() {
            warn!(entity = %entity, error = %err, "Direct call failed, continuing offline");
            Ok(())
        } else {
            debug!(entity = %entity, error = %err, "Direct call rejected");
            Err(SyncError::Rejected { entity, source: err })
        }
    }
}
