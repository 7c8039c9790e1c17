//! MedSync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core of the clinic
//! offline-sync engine:
//! - **Domain entities** - `LocalRecord`, `SyncQueueItem`, `SyncConflict`, `EntityKind`
//! - **Port definitions** - Traits for adapters: `ILocalStore`, `IRemoteApi`, `IConnectivity`
//! - **Configuration** - YAML-backed settings shared by every crate
//!
//! # Architecture
//!
//! The domain module contains pure data and rules with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! The sync crate orchestrates domain entities through port interfaces.

pub mod config;
pub mod domain;
pub mod ports;
