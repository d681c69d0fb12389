//! # DomainError
//!
//! Centralized error handling for the fleet services.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;
use uuid::Uuid;

/// The primary error type for all domain and service operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Resource not found (e.g., Monitor, Ad, Box)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Malformed input (e.g., missing justification, duplicate rotation index)
    #[error("validation error: {0}")]
    Validation(String),

    /// The actor lacks the capability or ownership needed for the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The entity is not in a state that allows the transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Resource already exists (e.g., client already on monitor)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Compare-and-swap on a monitor lost against a concurrent writer.
    #[error("monitor {monitor_id} was modified concurrently (expected version {expected})")]
    VersionConflict { monitor_id: Uuid, expected: u64 },

    /// A synchronous call to a box relay failed
    #[error("box relay error: {0}")]
    Upstream(String),

    /// Infrastructure failure in a storage adapter
    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal service error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }
}

/// A specialized Result type for domain logic.
pub type Result<T> = std::result::Result<T, DomainError>;

/// Failure talking to a box relay. Never leaves the sync gateway.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("box at {url} unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("box at {url} answered with status {status}")]
    Rejected { url: String, status: u16 },

    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl SyncError {
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url }
            | Self::Unreachable { url, .. }
            | Self::Rejected { url, .. }
            | Self::InvalidResponse { url, .. } => url,
        }
    }
}
