//! ToolInvoker error types.

use dockside_core::CoreError;
use thiserror::Error;

/// Failure of one analytics query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolInvokeError {
    /// No tenant key on the caller's routing context
    #[error("tenant not resolved: {0}")]
    TenantNotResolved(String),

    /// Connection, timeout or body read failure
    #[error("analytics transport error: {0}")]
    Transport(String),

    /// The analytics API answered with a non-success status
    #[error("analytics API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body was not the expected JSON shape
    #[error("analytics response could not be decoded: {0}")]
    Decode(String),

    /// Filter arguments failed validation
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolInvokeError {
    /// Whether retrying the same idempotent query may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolInvokeError::Transport(_) => true,
            ToolInvokeError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<ToolInvokeError> for CoreError {
    fn from(err: ToolInvokeError) -> Self {
        match err {
            ToolInvokeError::TenantNotResolved(msg) => CoreError::TenantNotResolved(msg),
            ToolInvokeError::InvalidArguments(msg) => CoreError::Validation(msg),
            other => CoreError::Remote(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for ToolInvokeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ToolInvokeError::Decode(err.to_string())
        } else {
            ToolInvokeError::Transport(err.to_string())
        }
    }
}
