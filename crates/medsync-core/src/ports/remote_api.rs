//! Remote API port (driven/secondary port)
//!
//! This module defines the interface to the clinic backend's per-entity REST
//! endpoints plus its health probe.
//!
//! ## Design Notes
//!
//! - Errors are classified with [`RemoteError`] instead of `anyhow` because
//!   the reconcilers branch on the outcome: retry later, surface, or treat a
//!   missing record as already deleted.
//! - Payloads are opaque JSON objects; the adapter never interprets fields.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{EntityKind, RecordData, RecordId};

// ============================================================================
// RemoteError
// ============================================================================

/// Classified outcome of a failed server call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No response at all (DNS, refused connection, reset)
    #[error("transport error: {0}")]
    Transport(String),

    /// The request exceeded its time budget
    #[error("request timed out")]
    Timeout,

    /// 5xx response
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// 4xx response other than 404
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    /// 404 response
    #[error("record not found on server")]
    NotFound,

    /// A 2xx response whose body could not be used
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Classifies a non-success HTTP status
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => RemoteError::NotFound,
            400..=499 => RemoteError::Client { status, message },
            _ => RemoteError::Server { status, message },
        }
    }

    /// Returns true if the call may succeed later without changing the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Transport(_) | RemoteError::Timeout | RemoteError::Server { .. }
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Server { status, .. } | RemoteError::Client { status, .. } => {
                Some(*status)
            }
            RemoteError::NotFound => Some(404),
            _ => None,
        }
    }
}

// ============================================================================
// IRemoteApi trait
// ============================================================================

/// Port trait for the clinic backend
///
/// Every method addresses the collection endpoint of `entity`
/// (see [`EntityKind::endpoint`]). Returned payloads are the server's full
/// record including `id`, `createdAt` and `updatedAt`.
#[async_trait::async_trait]
pub trait IRemoteApi: Send + Sync {
    /// POSTs a new record and returns the server copy
    async fn create(&self, entity: EntityKind, data: &RecordData)
        -> Result<RecordData, RemoteError>;

    /// PATCHes `id` with the changed fields and returns the server copy
    async fn update(
        &self,
        entity: EntityKind,
        id: &RecordId,
        patch: &RecordData,
    ) -> Result<RecordData, RemoteError>;

    /// DELETEs `id`
    async fn delete(&self, entity: EntityKind, id: &RecordId) -> Result<(), RemoteError>;

    /// GETs the current server copy of `id`
    async fn fetch(&self, entity: EntityKind, id: &RecordId) -> Result<RecordData, RemoteError>;

    /// Lists records changed since `since`, or every record when `None`
    async fn list_changed(
        &self,
        entity: EntityKind,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordData>, RemoteError>;

    /// Probes the health endpoint
    ///
    /// Any HTTP response counts as reachable; only transport failures and
    /// timeouts are errors.
    async fn health(&self) -> Result<(), RemoteError>;
}
