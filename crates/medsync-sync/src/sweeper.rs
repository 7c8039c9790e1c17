//! Retention sweeper - drops queue items that will never go through
//!
//! An item is unrecoverable when the server rejected it, when it failed
//! more than `max_attempts` times, or when it is older than `max_age`.
//! The matching local record is left alone and stays visibly pending.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use medsync_core::config::RetentionConfig;
use medsync_core::ports::{ILocalStore, SweepPolicy};

use crate::SyncError;

pub struct RetentionSweeper {
    store: Arc<dyn ILocalStore>,
    max_attempts: u32,
    max_age: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn ILocalStore>, config: &RetentionConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_attempts,
            max_age: Duration::hours(config.max_age_hours as i64),
        }
    }

    /// Sweeps the queue once, returning the number of dropped items
    pub async fn sweep(&self) -> Result<u64, SyncError> {
        let policy = SweepPolicy {
            max_attempts: self.max_attempts,
            created_before: Utc::now() - self.max_age,
        };
        let dropped = self.store.sweep_queue(policy).await?;

        if dropped > 0 {
            warn!(
                dropped,
                max_attempts = self.max_attempts,
                max_age_hours = self.max_age.num_hours(),
                "Dropped unrecoverable queue items"
            );
        } else {
            debug!("Retention sweep found nothing to drop");
        }
        Ok(dropped)
    }
}
