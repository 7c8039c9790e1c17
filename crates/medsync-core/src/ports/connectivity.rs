//! Connectivity port
//!
//! Exposes whether the server is actually reachable, as an observable
//! boolean. Components receive it by injection so tests can drive the
//! online/offline state deterministically.

use tokio::sync::watch;

/// Port trait for the online/offline signal
pub trait IConnectivity: Send + Sync {
    /// Current state; never blocks on a probe
    fn is_online(&self) -> bool;

    /// Receiver notified on every state change
    fn subscribe(&self) -> watch::Receiver<bool>;
}
