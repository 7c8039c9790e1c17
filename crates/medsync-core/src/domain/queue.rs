//! Sync queue entries
//!
//! Every mutation applied while the server is unreachable becomes a
//! [`SyncQueueItem`] in the durable outbox. Items are replayed in order by
//! the push reconciler.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::entity::EntityKind;
use super::errors::DomainError;
use super::newtypes::{QueueItemId, RecordId};
use super::record::RecordData;

/// Kind of mutation carried by a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Stable storage tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(DomainError::UnknownOperation(other.to_string())),
        }
    }
}

/// A pending mutation awaiting replay against the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    /// Auto-assigned, monotonically increasing
    pub id: QueueItemId,
    pub entity: EntityKind,
    pub operation: Operation,
    /// Target record; a temp id for creates and for edits of unconfirmed records
    pub entity_id: RecordId,
    /// Full payload for creates, changed fields for updates, absent for deletes
    pub data: Option<RecordData>,
    /// Last-synced values of the patched fields, captured when the update
    /// was first queued. Used for conflict detection.
    pub base: Option<RecordData>,
    pub created_at: DateTime<Utc>,
    /// Number of failed push attempts
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set when the server refused the item with a client error
    pub rejected: bool,
}

impl SyncQueueItem {
    /// Age of the item relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Returns true if the item may be pushed at `now`
    ///
    /// After `n` failed attempts the item waits `base * 2^(n-1)`, capped
    /// at `max`, measured from its last attempt.
    pub fn is_due(&self, now: DateTime<Utc>, base: Duration, max: Duration) -> bool {
        if self.rejected {
            return false;
        }
        match self.last_attempt_at {
            Some(last) if self.attempts > 0 => now >= last + backoff_delay(self.attempts, base, max),
            _ => true,
        }
    }
}

/// Backoff delay after `attempts` failures
pub fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    if attempts == 0 {
        return Duration::zero();
    }
    let exponent = (attempts - 1).min(20);
    let factor = 1i32 << exponent;
    let delay = base * factor;
    if delay > max {
        max
    } else {
        delay
    }
}
