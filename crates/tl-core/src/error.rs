//! # AppError
//!
//! Centralized error handling for the Tipline engine.
//! Every public entry point returns one of these instead of panicking.

use thiserror::Error;

/// The primary error type for all tl-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Resource not found (e.g., queue item, tipster, tip)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Malformed tip or decision input. Raised before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Claim race or double-resolution attempt. Callers re-fetch and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Lead sink or case-risk lookup failure
    #[error("downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    /// Infrastructure failure (e.g., audit archive write)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(entity, id.to_string())
    }

    /// Stable machine-readable tag, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(..) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Conflict(_) => "conflict",
            AppError::DownstreamUnavailable(_) => "downstream_unavailable",
            AppError::Internal(_) => "internal",
        }
    }
}

/// A specialized Result type for Tipline logic.
pub type Result<T> = std::result::Result<T, AppError>;
