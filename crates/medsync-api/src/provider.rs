//! RestRemoteApi - IRemoteApi implementation for the clinic backend
//!
//! Wraps the [`RestClient`] to fulfil the [`IRemoteApi`] port contract.
//!
//! ## Design Notes
//!
//! - Uses `tokio::sync::RwLock` because `IRemoteApi` methods take `&self`
//!   while replacing the bearer token requires `&mut RestClient`.
//! - The health probe uses its own, shorter time budget.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use medsync_core::config::Config;
use medsync_core::domain::{EntityKind, RecordData, RecordId};
use medsync_core::ports::{IRemoteApi, RemoteError};

use crate::client::RestClient;

/// Remote API implementation that delegates to the clinic REST endpoints
pub struct RestRemoteApi {
    client: RwLock<RestClient>,
    health_path: String,
    probe_timeout: Duration,
}

impl RestRemoteApi {
    /// Creates a new remote API wrapping the given client
    pub fn new(client: RestClient, health_path: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            client: RwLock::new(client),
            health_path: health_path.into(),
            probe_timeout,
        }
    }

    /// Builds the remote API from the `server` and `connectivity` sections
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = RestClient::from_config(&config.server)?;
        Ok(Self::new(
            client,
            config.server.health_path.clone(),
            config.connectivity.probe_timeout(),
        ))
    }

    /// Replaces the bearer token used by subsequent requests
    pub async fn set_access_token(&self, token: impl Into<String>) {
        self.client.write().await.set_access_token(token);
    }
}

#[async_trait::async_trait]
impl IRemoteApi for RestRemoteApi {
    async fn create(
        &self,
        entity: EntityKind,
        data: &RecordData,
    ) -> Result<RecordData, RemoteError> {
        let client = self.client.read().await;
        client.create(entity, data).await
    }

    async fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<RecordData, RemoteError> {
        let client = self.client.read().await;
        client.update(entity, id, patch).await
    }

    async fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<(), RemoteError> {
        let client = self.client.read().await;
        client.delete(entity, id).await
    }

    async fn fetch(&self, entity: EntityKind, id: &RecordId) -> Result<RecordData, RemoteError> {
        let client = self.client.read().await;
        client.get(entity, id).await
    }

    async fn list_changed(
        &self,
        entity: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordData>, RemoteError> {
        let client = self.client.read().await;
        client.list(entity, since).await
    }

    async fn health(&self) -> Result<(), RemoteError> {
        let client = self.client.read().await;
        client.probe(&self.health_path, self.probe_timeout).await
    }
}
