//! Conflict domain entities
//!
//! This module defines the record of a push-time disagreement between a
//! locally queued update and the server's current copy, and the strategies
//! available to settle it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityKind;
use super::errors::DomainError;
use super::newtypes::{ConflictId, QueueItemId, RecordId};
use super::record::RecordData;

/// How a conflict should be settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Adopt the server's copy and drop the local edit
    Server,
    /// Re-queue the local edit on top of the server's copy
    Client,
}

impl Resolution {
    /// Stable tag used on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Server => "server",
            Resolution::Client => "client",
        }
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" | "remote" => Ok(Resolution::Server),
            "client" | "local" => Ok(Resolution::Client),
            other => Err(DomainError::UnknownResolution(other.to_string())),
        }
    }
}

/// A queued update the server copy has diverged from
///
/// One conflict is recorded per queue item; every diverging field is listed
/// in [`SyncConflict::fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    id: ConflictId,
    operation_id: QueueItemId,
    entity: EntityKind,
    record_id: RecordId,
    /// Temp id the record was created under, when it was created offline
    temp_id: Option<RecordId>,
    /// The locally queued patch
    local: RecordData,
    /// The server's full current record
    remote: RecordData,
    fields: Vec<String>,
    detected_at: DateTime<Utc>,
}

impl SyncConflict {
    /// Creates a conflict for the queue item `operation_id`
    pub fn new(
        operation_id: QueueItemId,
        entity: EntityKind,
        record_id: RecordId,
        local: RecordData,
        remote: RecordData,
        fields: Vec<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            operation_id,
            entity,
            record_id,
            temp_id: None,
            local,
            remote,
            fields,
            detected_at: Utc::now(),
        }
    }

    /// Sets the temp id the record was created under
    pub fn with_temp_id(mut self, temp_id: Option<RecordId>) -> Self {
        self.temp_id = temp_id;
        self
    }

    pub fn id(&self) -> ConflictId {
        self.id
    }

    /// Queue item whose push produced this conflict
    pub fn operation_id(&self) -> QueueItemId {
        self.operation_id
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub fn temp_id(&self) -> Option<&RecordId> {
        self.temp_id.as_ref()
    }

    /// The locally queued patch
    pub fn local(&self) -> &RecordData {
        &self.local
    }

    /// The server's current record
    pub fn remote(&self) -> &RecordData {
        &self.remote
    }

    /// Names of the fields that diverged
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }
}
