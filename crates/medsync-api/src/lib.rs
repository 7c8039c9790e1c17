//! MedSync API - Clinic REST API client
//!
//! Provides an async client for:
//! - Per-entity create, update, delete and fetch calls
//! - Changed-since listings used by the pull reconciler
//! - The cheap health probe used by the connectivity monitor
//!
//! ## Modules
//!
//! - [`client`] - HTTP client, endpoint construction and error classification
//! - [`provider`] - `IRemoteApi` adapter over the client

pub mod client;
pub mod provider;

pub use client::RestClient;
pub use provider::RestRemoteApi;
