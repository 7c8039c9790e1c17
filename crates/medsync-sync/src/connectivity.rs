//! Connectivity monitor - tracks whether the server is actually reachable
//!
//! A live network interface is not enough: the [`ConnectivityMonitor`]
//! confirms reachability with a bounded probe of the health endpoint before
//! reporting online.
//!
//! ## Flow
//!
//! ```text
//! platform ──→ mpsc<InterfaceEvent> ──→ ConnectivityMonitor ──→ watch<bool>
//!                                            │
//!                                     IRemoteApi::health
//! ```
//!
//! - `Down` flips to offline immediately.
//! - `Up` probes once; on failure it stays offline and probes again after
//!   the retry delay.
//! - Every event bumps a generation counter, so a probe started for an older
//!   event never overrides a newer one.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use medsync_core::config::ConnectivityConfig;
use medsync_core::ports::{IConnectivity, IRemoteApi};

/// Network interface transitions reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceEvent {
    Up,
    Down,
}

// ============================================================================
// ConnectivityMonitor
// ============================================================================

/// Probe-backed online/offline signal
pub struct ConnectivityMonitor {
    remote: Arc<dyn IRemoteApi>,
    state: watch::Sender<bool>,
    /// Bumped on every interface event; probes compare before publishing
    generation: AtomicU64,
    probe_timeout: Duration,
    probe_retry: Duration,
}

impl ConnectivityMonitor {
    /// Creates a monitor that starts offline
    pub fn new(remote: Arc<dyn IRemoteApi>, config: &ConnectivityConfig) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            remote,
            state,
            generation: AtomicU64::new(0),
            probe_timeout: config.probe_timeout(),
            probe_retry: config.probe_retry(),
        }
    }

    /// Probes the health endpoint within the probe timeout
    ///
    /// Returns true for any HTTP response.
    pub async fn probe(&self) -> bool {
        match tokio::time::timeout(self.probe_timeout, self.remote.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "Health probe timed out"
                );
                false
            }
        }
    }

    /// Probes now and publishes the result
    pub async fn check_now(&self) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let online = self.probe().await;
        if self.is_current(generation) {
            self.publish(online);
        }
        online
    }

    /// Applies one interface event, probing if needed
    pub async fn handle_event(&self, event: InterfaceEvent) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(?event, generation, "Interface event");

        match event {
            InterfaceEvent::Down => self.publish(false),
            InterfaceEvent::Up => {
                if self.probe().await {
                    if self.is_current(generation) {
                        self.publish(true);
                    }
                    return;
                }
                if !self.is_current(generation) {
                    return;
                }
                self.publish(false);
                warn!(
                    retry_secs = self.probe_retry.as_secs(),
                    "Interface up but server unreachable, retrying once"
                );

                tokio::time::sleep(self.probe_retry).await;
                if !self.is_current(generation) {
                    return;
                }
                let online = self.probe().await;
                if self.is_current(generation) {
                    self.publish(online);
                }
            }
        }
    }

    /// Consumes interface events until the channel closes or `cancel` fires
    ///
    /// Each event is handled on its own task so a pending probe never delays
    /// a newer event; the previous task is aborted when a new event arrives.
    pub fn spawn(
        self: Arc<Self>,
        mut events: mpsc::Receiver<InterfaceEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Connectivity monitor starting");
            let mut pending: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else {
                            info!("Interface event channel closed");
                            break;
                        };
                        if let Some(task) = pending.take() {
                            task.abort();
                        }
                        let monitor = Arc::clone(&self);
                        pending = Some(tokio::spawn(async move {
                            monitor.handle_event(event).await;
                        }));
                    }
                }
            }

            if let Some(task) = pending.take() {
                task.abort();
            }
            info!("Connectivity monitor stopped");
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn publish(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
    }
}

impl IConnectivity for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

// ============================================================================
// ManualConnectivity
// ============================================================================

/// Connectivity signal set by hand
///
/// Used for forced offline mode and to drive the engine deterministically
/// in tests.
#[derive(Debug)]
pub struct ManualConnectivity {
    state: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Sets the state, notifying subscribers if it changed
    pub fn set_online(&self, online: bool) {
        self.state.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }
}

impl IConnectivity for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

// ============================================================================
// Unit tests
// ============================================================================
