//! Error types shared across the service.
//!
//! Every error carries a stable machine-readable kind so the HTTP layer can
//! map it to a status code and clients can branch without parsing messages.

use thiserror::Error;

use crate::breaker::BreakerStats;

/// Result alias used throughout laurel
pub type Result<T> = std::result::Result<T, LaurelError>;

/// Service-wide error taxonomy
#[derive(Debug, Error)]
pub enum LaurelError {
    /// Malformed or missing input
    #[error("validation failed: {0}")]
    Validation(String),

    /// The actor's scope does not cover the target
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Definition, subject, or award absent or inaccessible.
    /// Deliberately covers "wrong institution" for subjects so callers cannot
    /// enumerate cross-institution existence.
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-revoked award already exists for this (subject, definition) pair
    #[error("subject already holds this badge")]
    DuplicateAward,

    /// A definition with this name already exists in the institution
    #[error("a badge definition with this name already exists")]
    DuplicateDefinition,

    /// The badge definition is deactivated
    #[error("badge definition is not active")]
    BadgeInactive,

    /// Throughput limit exceeded for this actor/operation
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Bulk batch larger than the configured ceiling
    #[error("bulk batch of {requested} items exceeds the limit of {max}")]
    BulkLimitExceeded { requested: usize, max: usize },

    /// A dependency is degraded (circuit open or identity timeout)
    #[error("dependency '{dependency}' unavailable")]
    DependencyUnavailable {
        dependency: String,
        stats: Option<BreakerStats>,
    },

    /// Storage transaction failed
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Storage-level error outside a transaction
    #[error("database error: {0}")]
    Database(String),

    /// Invalid service configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl LaurelError {
    /// Stable machine-readable kind for API responses and logs
    pub fn kind(&self) -> &'static str {
        match self {
            LaurelError::Validation(_) => "validation_failure",
            LaurelError::AuthorizationDenied(_) => "authorization_denied",
            LaurelError::NotFound(_) => "not_found",
            LaurelError::DuplicateAward => "duplicate_award",
            LaurelError::DuplicateDefinition => "duplicate_definition",
            LaurelError::BadgeInactive => "badge_inactive",
            LaurelError::RateLimited { .. } => "rate_limited",
            LaurelError::BulkLimitExceeded { .. } => "bulk_limit_exceeded",
            LaurelError::DependencyUnavailable { .. } => "dependency_unavailable",
            LaurelError::Transaction(_) => "transaction_failure",
            LaurelError::Database(_) => "database_error",
            LaurelError::Config(_) => "config_error",
        }
    }

    /// Retry-after hint in seconds, present only for rate limiting
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LaurelError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
