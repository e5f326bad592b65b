//! Core Error Types
//!
//! Defines the foundational error types used across the Dockside workspace.
//! These error types only depend on thiserror + std so the core crate stays
//! lightweight.
//!
//! The application crate extends these with variants for storage, HTTP,
//! sandbox execution, etc.

use thiserror::Error;

/// Core error type for the Dockside workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The routing context carries no tenant key, so no tenant-scoped
    /// query may be issued.
    #[error("Tenant not resolved: {0}")]
    TenantNotResolved(String),

    /// A remote collaborator (analytics API, sandbox, ...) failed
    #[error("Remote error: {0}")]
    Remote(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a tenant-not-resolved error
    pub fn tenant_not_resolved(msg: impl Into<String>) -> Self {
        Self::TenantNotResolved(msg.into())
    }

    /// Create a remote error
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::Remote(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
