//! Sync orchestrator - runs sync cycles and their automatic triggers
//!
//! A full sync is one push pass followed by one pull pass. At most one cycle
//! runs at a time: a call made while another is in flight returns
//! [`SyncOutcome::AlreadyRunning`] instead of queueing.
//!
//! ## Triggers handled by [`SyncOrchestrator::run`]
//!
//! ```text
//! startup            ──→ retention sweep, full sync if online with work queued
//! offline → online   ──→ settle delay, full sync if the queue is non-empty
//! periodic timer     ──→ pull only (while online)
//! app foreground     ──→ pull only (while online)
//! cancel token       ──→ stop after the current cycle
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use medsync_core::config::Config;
use medsync_core::domain::SyncReport;
use medsync_core::ports::{IConnectivity, ILocalStore, IRemoteApi};

use crate::ledger::ConflictLedger;
use crate::pull::PullReconciler;
use crate::push::PushReconciler;
use crate::sweeper::RetentionSweeper;
use crate::SyncError;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Result of a sync request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran; see the report for per-item results
    Completed(SyncReport),
    /// Another cycle was in flight; nothing was done
    AlreadyRunning,
    /// The server is unreachable; nothing was done
    Offline,
}

/// Notifications for the UI layer (cache invalidation, toasts)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    CycleCompleted(SyncReport),
    /// Open conflicts after a push that produced new ones
    ConflictsDetected(usize),
}

/// Clears the in-flight flag when the cycle ends, even on error
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

pub struct SyncOrchestrator {
    store: Arc<dyn ILocalStore>,
    connectivity: Arc<dyn IConnectivity>,
    ledger: Arc<ConflictLedger>,
    push: PushReconciler,
    pull: PullReconciler,
    sweeper: RetentionSweeper,
    in_flight: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
    foreground: Notify,
    settle_delay: Duration,
    pull_interval: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteApi>,
        connectivity: Arc<dyn IConnectivity>,
        ledger: Arc<ConflictLedger>,
        config: &Config,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            push: PushReconciler::new(
                Arc::clone(&store),
                Arc::clone(&remote),
                Arc::clone(&ledger),
                &config.sync,
            ),
            pull: PullReconciler::new(Arc::clone(&store), remote),
            sweeper: RetentionSweeper::new(Arc::clone(&store), &config.retention),
            store,
            connectivity,
            ledger,
            in_flight: AtomicBool::new(false),
            events,
            foreground: Notify::new(),
            settle_delay: config.connectivity.settle_delay(),
            pull_interval: config.sync.pull_interval(),
        }
    }

    pub fn ledger(&self) -> &Arc<ConflictLedger> {
        &self.ledger
    }

    /// Receiver of cycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns true while a cycle is running
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Signals that the app returned to the foreground
    pub fn notify_foreground(&self) {
        self.foreground.notify_one();
    }

    /// Drops unrecoverable queue items
    pub async fn sweep(&self) -> Result<u64, SyncError> {
        self.sweeper.sweep().await
    }

    /// Push then pull
    ///
    /// A pull failure is reported in the returned report, not as an error.
    #[tracing::instrument(skip(self))]
    pub async fn full_sync(&self) -> Result<SyncOutcome, SyncError> {
        self.cycle(true).await
    }

    /// Pull without pushing
    #[tracing::instrument(skip(self))]
    pub async fn pull_only(&self) -> Result<SyncOutcome, SyncError> {
        self.cycle(false).await
    }

    async fn cycle(&self, with_push: bool) -> Result<SyncOutcome, SyncError> {
        if !self.connectivity.is_online() {
            debug!("Offline, sync skipped");
            return Ok(SyncOutcome::Offline);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!("Sync already in flight, skipped");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let mut report = SyncReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        info!(push = with_push, "Starting sync cycle");

        if with_push {
            let stats = self.push.push().await?;
            if stats.conflicts > 0 {
                let open = self.ledger.len().await;
                let _ = self.events.send(SyncEvent::ConflictsDetected(open));
            }
            report.push = Some(stats);
        }

        match self.pull.pull().await {
            Ok(stats) => report.pull = Some(stats),
            Err(e) => {
                warn!(error = %e, "Pull failed, store left unchanged");
                report.pull_error = Some(e.to_string());
            }
        }

        report.remaining = self.store.queue_len().await?;
        report.finished_at = Some(Utc::now());

        info!(
            pushed = report.push.map(|s| s.success),
            conflicts = report.push.map(|s| s.conflicts),
            errors = report.push.map(|s| s.errors),
            pulled = report.pull.map(|s| s.applied),
            remaining = report.remaining,
            duration_ms = report.duration_ms(),
            "Sync cycle finished"
        );
        let _ = self.events.send(SyncEvent::CycleCompleted(report.clone()));
        Ok(SyncOutcome::Completed(report))
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Drives automatic syncs until `cancel` fires
    ///
    /// A cycle in progress always finishes before the loop observes the
    /// cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            settle_ms = self.settle_delay.as_millis() as u64,
            pull_interval_secs = self.pull_interval.as_secs(),
            "Sync orchestrator starting"
        );

        if let Err(e) = self.sweeper.sweep().await {
            error!(error = %e, "Startup sweep failed");
        }

        let mut online_rx = self.connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();
        if was_online {
            self.sync_if_queued().await;
        }

        let mut timer = tokio::time::interval(self.pull_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        timer.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                changed = online_rx.changed() => {
                    if changed.is_err() {
                        warn!("Connectivity source dropped, orchestrator stopping");
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(self.settle_delay) => {}
                        }
                        self.sync_if_queued().await;
                    }
                    was_online = online;
                }

                _ = timer.tick() => {
                    if self.connectivity.is_online() {
                        self.run_logged(false).await;
                    }
                }

                _ = self.foreground.notified() => {
                    if self.connectivity.is_online() {
                        debug!("Foreground sync");
                        self.run_logged(false).await;
                    }
                }
            }
        }

        info!("Sync orchestrator stopped");
    }

    async fn sync_if_queued(&self) {
        match self.store.queue_len().await {
            Ok(0) => debug!("Back online with an empty queue"),
            Ok(queued) => {
                info!(queued, "Back online, pushing queued mutations");
                self.run_logged(true).await;
            }
            Err(e) => error!(error = %e, "Failed to read queue length"),
        }
    }

    async fn run_logged(&self, with_push: bool) {
        match self.cycle(with_push).await {
            Ok(SyncOutcome::Completed(_)) => {}
            Ok(outcome) => debug!(?outcome, "Automatic sync not run"),
            Err(e) => error!(error = %e, "Automatic sync failed"),
        }
    }
}
