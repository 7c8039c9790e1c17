//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, unknown entity kinds and malformed payloads.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Unknown entity type tag
    #[error("Unknown entity kind: {0}")]
    UnknownEntity(String),

    /// Unknown queue operation tag
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Unknown sync status tag
    #[error("Unknown sync status: {0}")]
    UnknownStatus(String),

    /// Unknown conflict resolution
    #[error("Unknown resolution: {0}")]
    UnknownResolution(String),

    /// A record payload was not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}
