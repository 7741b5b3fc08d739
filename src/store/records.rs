// ============================================================================
// File: packages/gridplane/src/store/records.rs
// ----------------------------------------------------------------------------
// Row types persisted by the storage collaborator that do not belong to a
// single service module.
// ============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status shared by users, accounts and authentication systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectStatus {
    Undefined,
    Locked,
    Active,
    Deleted,
}

/// User privilege level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Privilege {
    User,
    Admin,
}

/// Whether the user's password must be changed before use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PasswordState {
    Active,
    Temporary,
}

/// A control plane user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    pub password_hash: String,
    pub privilege: Privilege,
    pub status: ObjectStatus,
    pub password_state: PasswordState,
}

impl UserRecord {
    /// Create an active, ordinary user with the given clear-text password
    pub fn new<U: Into<String>>(user_id: U, password: &str) -> Self {
        let user_id = user_id.into();
        let password_hash = hash_password(&user_id, password);
        Self {
            user_id,
            password_hash,
            privilege: Privilege::User,
            status: ObjectStatus::Active,
            password_state: PasswordState::Active,
        }
    }

    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    pub fn with_status(mut self, status: ObjectStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_password_state(mut self, state: PasswordState) -> Self {
        self.password_state = state;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.privilege == Privilege::Admin
    }

    /// Compare a clear-text password against the stored hash
    pub fn password_matches(&self, password: &str) -> bool {
        self.password_hash == hash_password(&self.user_id, password)
    }
}

/// Hash a password salted with its owner's identifier
pub fn hash_password(user_id: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// A user's identity on an external authentication system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAccount {
    pub user_id: String,
    pub auth_system_id: String,
    pub login: String,
    pub status: ObjectStatus,
}

/// The login a user holds on a batch machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAccount {
    pub user_id: String,
    pub machine_id: String,
    pub login: String,
    pub home: String,
}

/// Service family a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceCategory {
    /// Users and sessions
    Ums,
    /// Tasks and jobs
    Tms,
    /// Files
    Fms,
}

/// Outcome of a recorded command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Running,
    Success,
    Failed,
}

/// Audit entry for a privileged operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: u64,
    pub session_key: String,
    pub description: String,
    pub category: ServiceCategory,
    pub status: CommandStatus,
    pub object_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}
