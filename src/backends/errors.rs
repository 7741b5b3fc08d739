// ============================================================================
// File: packages/gridplane/src/backends/errors.rs
// ----------------------------------------------------------------------------
// Backend-specific error types
// ============================================================================

use crate::error::GridError;
use crate::remote::RemoteError;

/// Backend-specific error types
///
/// Covers errors that can occur during submission, polling and
/// cancellation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Backend configuration is invalid or incomplete
    #[error("Invalid configuration for {backend}: {details}")]
    InvalidConfig {
        backend: &'static str,
        details: String,
    },

    /// Caller-supplied value is malformed
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Scheduler rejected a command or answered in an unknown way
    #[error("{backend} scheduler error: {details}")]
    Scheduler {
        backend: &'static str,
        details: String,
    },

    /// Cloud provider call failed
    #[error("RPC {method} failed: {details}")]
    Rpc { method: String, details: String },

    /// Something did not happen within its time budget
    #[error("Timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    /// Remote shell failure
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local script staging failed
    #[error("File system operation failed: {details}")]
    FileSystemFailed { details: String },

    /// Internal backend error
    #[error("Internal backend error: {message}")]
    Internal { message: String },
}

impl From<BackendError> for GridError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidParameter(details) => GridError::InvalidParameter(details),
            BackendError::Remote(remote) => GridError::from(remote),
            BackendError::Scheduler { backend, .. } | BackendError::InvalidConfig { backend, .. } => {
                GridError::backend(backend, err.to_string())
            }
            BackendError::Rpc { .. } | BackendError::Timeout { .. } => {
                GridError::backend("Cloud", err.to_string())
            }
            BackendError::FileSystemFailed { .. } | BackendError::Internal { .. } => {
                GridError::system(err.to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for BackendError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackendError::Internal {
            message: format!("Task join failed: {err}"),
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;
