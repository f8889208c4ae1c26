//! # DomainError
//!
//! Centralized error handling for the wishboard core.
//! Every mutation and query surfaces one of these; none are retried internally.

use thiserror::Error;

/// The primary error type for all domain and service operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Resource not found (e.g., Board, Item, approval record)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Malformed or out-of-range item fields; the message names the field
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Duplicate approval or other natural-key collision
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credential present but wrong (e.g., facilitator token mismatch)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Credential missing altogether
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Infrastructure failure (e.g., store unreachable, lock contention)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }
}

/// A specialized Result type for wishboard logic.
pub type Result<T> = std::result::Result<T, DomainError>;
