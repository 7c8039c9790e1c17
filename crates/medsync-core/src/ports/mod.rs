//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILocalStore`] - Record snapshots, sync queue and sync metadata
//! - [`IRemoteApi`] - Per-entity REST endpoints and the health probe
//! - [`IConnectivity`] - Observable online/offline signal

pub mod connectivity;
pub mod local_store;
pub mod remote_api;

pub use connectivity::IConnectivity;
pub use local_store::{DeleteOutcome, ILocalStore, RemoteChange, StoreError, SweepPolicy};
pub use remote_api::{IRemoteApi, RemoteError};
