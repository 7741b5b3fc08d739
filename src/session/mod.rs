// ============================================================================
// File: packages/gridplane/src/session/mod.rs
// ----------------------------------------------------------------------------
// Session authority for the control plane.
//
// Split by concern:
// - connect: login, reconnection, key and id generation
// - guard: the check/authorize gate and command bookkeeping
// - lifecycle: close and the timeout sweep
// ============================================================================

mod connect;
mod guard;
mod lifecycle;


use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::CredentialVerifier;
use crate::error::{GridError, GridResult};
use crate::store::{Database, UserRecord};

/// Rule governing when a session terminates on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosePolicy {
    /// Closed after `timeout` seconds without activity
    OnTimeout,
    /// Closed when the client disconnects
    OnDisconnect,
    /// Whatever the server default is at the time it matters
    Default,
}

impl fmt::Display for ClosePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosePolicy::OnTimeout => "ON_TIMEOUT",
            ClosePolicy::OnDisconnect => "ON_DISCONNECT",
            ClosePolicy::Default => "DEFAULT",
        };
        f.write_str(name)
    }
}

impl FromStr for ClosePolicy {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON_TIMEOUT" | "1" => Ok(ClosePolicy::OnTimeout),
            "ON_DISCONNECT" | "2" => Ok(ClosePolicy::OnDisconnect),
            "DEFAULT" | "0" => Ok(ClosePolicy::Default),
            other => Err(GridError::invalid(format!("Unknown close policy '{other}'"))),
        }
    }
}

/// Session state; CLOSED is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Closed,
}

/// An authenticated caller context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque secret presented on every call
    pub session_key: String,
    /// Human-readable identifier used for reconnection
    pub session_id: String,
    /// Identity the session acts as
    pub user_id: String,
    /// Identity that actually authenticated (differs under substitution)
    pub authenticated_as: String,
    pub client_host: String,
    pub close_policy: ClosePolicy,
    /// Inactivity delay in seconds, absent for disconnect-closed sessions
    pub timeout: Option<u64>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

/// Login material presented by a caller
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub password: String,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(user_id: U, password: P) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
        }
    }
}

/// Caller choices for a new session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub close_policy: ClosePolicy,
    /// Requested inactivity delay; zero or absent means the server default
    pub timeout: Option<u64>,
    /// Act as another user (admins only)
    pub substitute_user_id: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            close_policy: ClosePolicy::Default,
            timeout: None,
            substitute_user_id: None,
        }
    }
}

impl ConnectOptions {
    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn with_substitute<U: Into<String>>(mut self, user_id: U) -> Self {
        self.substitute_user_id = Some(user_id.into());
        self
    }
}

/// Server-wide session defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Policy that DEFAULT resolves to; never `ClosePolicy::Default` itself
    pub close_policy: ClosePolicy,
    /// Inactivity delay in seconds
    pub timeout: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            close_policy: ClosePolicy::OnDisconnect,
            timeout: 3600,
        }
    }
}

impl SessionDefaults {
    /// Policy a session actually follows
    pub fn effective_policy(&self, policy: ClosePolicy) -> ClosePolicy {
        match policy {
            ClosePolicy::Default => match self.close_policy {
                ClosePolicy::Default => ClosePolicy::OnDisconnect,
                concrete => concrete,
            },
            concrete => concrete,
        }
    }
}

/// A validated session together with the user it acts as
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session: Session,
    pub user: UserRecord,
}

impl SessionContext {
    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }

    /// Fail with PermissionDenied unless the caller is an admin
    pub fn require_admin(&self, operation: &str) -> GridResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(GridError::PermissionDenied(format!(
                "{operation} requires admin privilege"
            )))
        }
    }
}

/// Owns session creation, validation and termination
#[derive(Debug, Clone)]
pub struct SessionAuthority {
    db: Arc<dyn Database>,
    verifier: Arc<dyn CredentialVerifier>,
    defaults: SessionDefaults,
}

impl SessionAuthority {
    pub fn new(
        db: Arc<dyn Database>,
        verifier: Arc<dyn CredentialVerifier>,
        defaults: SessionDefaults,
    ) -> Self {
        Self {
            db,
            verifier,
            defaults,
        }
    }

    pub fn defaults(&self) -> SessionDefaults {
        self.defaults
    }

    fn load_session(&self, session_key: &str) -> GridResult<Session> {
        self.db
            .find_session_by_key(session_key)?
            .ok_or(GridError::SessionNotFound)
    }
}
