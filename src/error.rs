// ============================================================================
// File: packages/gridplane/src/error.rs
// ----------------------------------------------------------------------------
// Crate-wide error taxonomy.
//
// Every public operation returns `GridResult<T>`. Layer-specific errors
// (storage, remote shell, backends) convert into `GridError` so callers see one
// flat set of failure kinds.
// ============================================================================

/// Errors surfaced by control plane operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    /// Malformed input (bad enum value, malformed job handle, ...)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Caller lacks the privilege required by the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Credentials do not resolve to a known user
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// No session carries this session identifier
    #[error("Unknown session id: {0}")]
    UnknownSessionId(String),

    /// No session matches the given key (or host/user combination)
    #[error("Session not found")]
    SessionNotFound,

    /// Session exists but is closed
    #[error("Session expired")]
    SessionExpired,

    /// Owning user account is locked
    #[error("User {0} is locked")]
    UserLocked(String),

    /// Owning user must change a temporary password first
    #[error("User {0} has a temporary password")]
    TemporaryPassword(String),

    /// Session cannot be closed while a command is in flight
    #[error("A command is still running in session {0}")]
    CommandRunning(String),

    /// No job with this identifier (or no output recorded for it)
    #[error("Unknown job id: {0}")]
    UnknownJobId(String),

    /// No configured machine with this identifier
    #[error("Unknown machine: {0}")]
    UnknownMachine(String),

    /// No live authentication system with this identifier
    #[error("Unknown authentication system: {0}")]
    UnknownAuthSystem(String),

    /// Authentication system identifier or name already taken
    #[error("Authentication system already exists: {0}")]
    AuthSystemAlreadyExists(String),

    /// Authentication system is already locked
    #[error("Authentication system already locked: {0}")]
    AuthSystemAlreadyLocked(String),

    /// Remote host unreachable (TCP, handshake, timeout)
    #[error("Connection to {host} failed: {details}")]
    Connection { host: String, details: String },

    /// Remote host rejected the credentials
    #[error("Authentication on {host} failed: {details}")]
    Auth { host: String, details: String },

    /// Remote file copy failed
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Batch or cloud backend reported a failure
    #[error("Backend {backend} failed: {details}")]
    Backend {
        backend: &'static str,
        details: String,
    },

    /// Storage failure or broken internal invariant
    #[error("System error: {0}")]
    System(String),
}

impl GridError {
    /// Create a system error
    pub fn system<M: Into<String>>(message: M) -> Self {
        Self::System(message.into())
    }

    /// Create an invalid parameter error
    pub fn invalid<M: Into<String>>(message: M) -> Self {
        Self::InvalidParameter(message.into())
    }

    /// Create a backend error
    pub fn backend<D: Into<String>>(backend: &'static str, details: D) -> Self {
        Self::Backend {
            backend,
            details: details.into(),
        }
    }

    /// Whether the failure is transient and worth a retry by the caller
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<tokio::task::JoinError> for GridError {
    fn from(err: tokio::task::JoinError) -> Self {
        GridError::system(format!("Task join failed: {err}"))
    }
}

/// Result type for control plane operations
pub type GridResult<T> = Result<T, GridError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transient() {
        let conn = GridError::Connection {
            host: "cluster".to_string(),
            details: "refused".to_string(),
        };
        let auth = GridError::Auth {
            host: "cluster".to_string(),
            details: "denied".to_string(),
        };

        assert!(conn.is_transient());
        assert!(!auth.is_transient());
        assert!(!GridError::SessionExpired.is_transient());
    }

    #[test]
    fn error_messages_name_the_subject() {
        assert_eq!(
            GridError::UnknownJobId("J_4".to_string()).to_string(),
            "Unknown job id: J_4"
        );
        assert_eq!(
            GridError::backend("Slurm", "sbatch exited 1").to_string(),
            "Backend Slurm failed: sbatch exited 1"
        );
    }
}
