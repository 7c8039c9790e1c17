//! Sync cycle statistics

use std::fmt::{self, Display, Formatter};
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome counters of a push pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Items confirmed by the server and removed from the queue
    pub success: u32,
    /// Items held back because the server copy diverged
    pub conflicts: u32,
    /// Items that failed (transport, server or client errors)
    pub errors: u32,
    /// Items waiting for a parent record to be confirmed
    pub deferred: u32,
    /// Items skipped for backoff or an open conflict
    pub skipped: u32,
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.conflicts += other.conflicts;
        self.errors += other.errors;
        self.deferred += other.deferred;
        self.skipped += other.skipped;
    }
}

impl Display for SyncStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pushed, {} conflicts, {} errors, {} deferred, {} skipped",
            self.success, self.conflicts, self.errors, self.deferred, self.skipped
        )
    }
}

/// Outcome counters of a pull pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStats {
    /// Server records written into the store
    pub applied: u32,
    /// Local records removed because the server deleted them
    pub purged: u32,
    /// Server records ignored because the local copy is pending
    pub kept_pending: u32,
}

impl Display for PullStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} purged, {} kept pending",
            self.applied, self.purged, self.kept_pending
        )
    }
}

/// Summary of one orchestrated sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Push counters, absent for pull-only cycles
    pub push: Option<SyncStats>,
    /// Pull counters, absent if the pull failed
    pub pull: Option<PullStats>,
    /// Human readable pull failure, if any
    pub pull_error: Option<String>,
    /// Queue length after the cycle
    pub remaining: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncReport {
    /// Duration of the cycle in milliseconds, when both ends are known
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
