//! Local record snapshots
//!
//! A [`LocalRecord`] is the client-held copy of one clinic entity plus the
//! bookkeeping the sync engine needs: the temp id it was created under, its
//! sync status and soft-delete markers.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entity::EntityKind;
use super::errors::DomainError;
use super::newtypes::{is_temp_id, RecordId};

/// Opaque JSON object holding an entity's fields
pub type RecordData = serde_json::Map<String, Value>;

/// Whether the local snapshot matches the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Identical to the last server acknowledgement
    Synced,
    /// Carries local mutations that still sit in the queue
    Pending,
}

impl SyncStatus {
    /// Stable storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Pending => "pending",
        }
    }
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncStatus::Synced),
            "pending" => Ok(SyncStatus::Pending),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Client-held copy of a clinic entity plus sync bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Server id, or the temp id while the record is unconfirmed
    pub id: RecordId,
    /// Set only for records created offline and not yet confirmed
    pub temp_id: Option<RecordId>,
    /// Entity type tag
    pub entity: EntityKind,
    /// Entity fields, including `id`
    pub data: RecordData,
    /// Synced or pending
    pub sync_status: SyncStatus,
    /// Soft-delete marker for deletes awaiting confirmation
    pub is_deleted: bool,
    /// When the soft delete happened
    pub deleted_at: Option<DateTime<Utc>>,
    /// Last local write of any kind
    pub last_modified: DateTime<Utc>,
    /// Creation time as reported by the server (or local creation time)
    pub created_at: DateTime<Utc>,
    /// Update time as reported by the server (or local update time)
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    /// Builds a pending record for an offline create
    ///
    /// The payload's `id` field is overwritten with the temp id.
    pub fn new_offline(entity: EntityKind, data: RecordData, now: DateTime<Utc>) -> Self {
        Self::new_offline_with_id(entity, data, RecordId::new_temp(), now)
    }

    /// Like [`LocalRecord::new_offline`] with a caller-chosen temp id
    pub fn new_offline_with_id(
        entity: EntityKind,
        mut data: RecordData,
        temp_id: RecordId,
        now: DateTime<Utc>,
    ) -> Self {
        data.insert("id".to_string(), Value::String(temp_id.to_string()));
        Self {
            id: temp_id.clone(),
            temp_id: Some(temp_id),
            entity,
            data,
            sync_status: SyncStatus::Pending,
            is_deleted: false,
            deleted_at: None,
            last_modified: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builds a synced record from a server payload
    ///
    /// # Errors
    /// Returns error if the payload has no usable `id`
    pub fn from_server(entity: EntityKind, data: RecordData) -> Result<Self, DomainError> {
        let id = payload_id(&data)?;
        let now = Utc::now();
        let created_at = payload_timestamp(&data, "createdAt").unwrap_or(now);
        let updated_at = payload_timestamp(&data, "updatedAt").unwrap_or(created_at);
        Ok(Self {
            id,
            temp_id: None,
            entity,
            data,
            sync_status: SyncStatus::Synced,
            is_deleted: false,
            deleted_at: None,
            last_modified: now,
            created_at,
            updated_at,
        })
    }

    /// Returns true if the server has never acknowledged this record
    pub fn is_unconfirmed(&self) -> bool {
        self.temp_id.is_some()
    }

    /// Returns true if the record carries unpushed mutations
    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::Pending
    }

    /// Applies a patch to the payload and marks the record pending
    pub fn apply_patch(&mut self, patch: &RecordData, now: DateTime<Utc>) {
        merge_into(&mut self.data, patch);
        self.sync_status = SyncStatus::Pending;
        self.last_modified = now;
        self.updated_at = now;
    }

    /// Marks the record as deleted pending server confirmation
    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.is_deleted = true;
        self.deleted_at = Some(now);
        self.sync_status = SyncStatus::Pending;
        self.last_modified = now;
    }
}

/// Extracts the `id` field of a payload
///
/// Numeric ids are accepted and rendered as strings.
///
/// # Errors
/// Returns error if the field is missing or not a string/number
pub fn payload_id(data: &RecordData) -> Result<RecordId, DomainError> {
    match data.get("id") {
        Some(Value::String(s)) => RecordId::new(s.clone()),
        Some(Value::Number(n)) => RecordId::new(n.to_string()),
        Some(other) => Err(DomainError::InvalidPayload(format!(
            "id must be a string, got {other}"
        ))),
        None => Err(DomainError::InvalidPayload(
            "payload has no id field".to_string(),
        )),
    }
}

/// Parses an RFC 3339 timestamp field from a payload
pub fn payload_timestamp(data: &RecordData, field: &str) -> Option<DateTime<Utc>> {
    data.get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Returns true if the server marked the payload as deleted
pub fn payload_is_tombstone(data: &RecordData) -> bool {
    data.get("isDeleted").and_then(Value::as_bool).unwrap_or(false)
}

/// Shallow-merges `patch` into `target`; later values win
pub fn merge_into(target: &mut RecordData, patch: &RecordData) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// Converts a JSON value into a payload object
///
/// # Errors
/// Returns error if the value is not an object
pub fn into_record_data(value: Value) -> Result<RecordData, DomainError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DomainError::InvalidPayload(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

/// Reference fields of `entity` whose value in `data` is still a temp id
pub fn temp_references(entity: EntityKind, data: &RecordData) -> Vec<String> {
    entity
        .references()
        .iter()
        .filter_map(|reference| data.get(reference.field).and_then(Value::as_str))
        .filter(|value| is_temp_id(value))
        .map(ToString::to_string)
        .collect()
}
