// ============================================================================
// File: packages/gridplane/src/store/mod.rs
// ----------------------------------------------------------------------------
// Storage collaborator contract.
//
// The control plane never speaks a SQL dialect. It depends on the `Database`
// trait below: a small transactional surface for identifier counters plus
// typed accessors for the rows each service reads and writes. Single-row
// accessors are atomic on their own; compound read-modify-write sequences go
// through `begin_transaction` / `commit` / `rollback`.
// ============================================================================

mod memory;
mod records;

use chrono::{DateTime, Utc};

pub use memory::MemoryDatabase;
pub use records::{
    AuthAccount, CommandRecord, CommandStatus, LocalAccount, ObjectStatus, PasswordState,
    Privilege, ServiceCategory, UserRecord, hash_password,
};

use crate::auth::AuthSystem;
use crate::backends::JobStatus;
use crate::error::GridError;
use crate::ids::ObjectType;
use crate::jobs::Job;
use crate::session::Session;

/// Identifier of an open storage transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxnId(pub u64);

/// Storage-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Transaction was never opened or is already finished
    #[error("Unknown transaction {0:?}")]
    UnknownTransaction(TxnId),

    /// Insert collided with an existing primary key
    #[error("Duplicate key {key} in {table}")]
    Duplicate { table: &'static str, key: String },

    /// Update targeted a row that does not exist
    #[error("No row {key} in {table}")]
    Missing { table: &'static str, key: String },

    /// Write would bring a CLOSED session back to ACTIVE
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// Internal lock was poisoned by a panicking writer
    #[error("Storage lock poisoned: {0}")]
    Poisoned(String),
}

impl From<StoreError> for GridError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SessionClosed(_) => GridError::SessionExpired,
            StoreError::Missing { table: "vsession", .. } => GridError::SessionNotFound,
            other => GridError::system(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract storage used by every service
pub trait Database: Send + Sync + std::fmt::Debug {
    // --- transactions and identifier counters -------------------------------

    fn begin_transaction(&self) -> StoreResult<TxnId>;

    fn commit(&self, txn: TxnId) -> StoreResult<()>;

    fn rollback(&self, txn: TxnId) -> StoreResult<()>;

    /// Increment the counter of `object_type` and insert a placeholder row
    /// keyed by the new value. The row becomes visible on commit; the counter
    /// value is consumed even if the transaction rolls back.
    fn reserve_row(&self, txn: TxnId, object_type: ObjectType) -> StoreResult<u64>;

    /// Whether some row of `object_type` already carries `object_id`
    fn object_id_exists(&self, object_type: ObjectType, object_id: &str) -> StoreResult<bool>;

    /// Stamp `object_id` on the committed placeholder row `key`
    fn assign_object_id(
        &self,
        object_type: ObjectType,
        key: u64,
        object_id: &str,
    ) -> StoreResult<()>;

    // --- users and accounts -------------------------------------------------

    fn insert_user(&self, user: UserRecord) -> StoreResult<()>;

    fn find_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    fn insert_local_account(&self, account: LocalAccount) -> StoreResult<()>;

    fn find_local_account(
        &self,
        user_id: &str,
        machine_id: &str,
    ) -> StoreResult<Option<LocalAccount>>;

    fn insert_auth_account(&self, account: AuthAccount) -> StoreResult<()>;

    fn auth_accounts_for_user(&self, user_id: &str) -> StoreResult<Vec<AuthAccount>>;

    /// Set `status` on every account bound to `auth_system_id`; returns the count
    fn set_auth_accounts_status(
        &self,
        auth_system_id: &str,
        status: ObjectStatus,
    ) -> StoreResult<usize>;

    // --- sessions and commands ----------------------------------------------

    fn insert_session(&self, session: Session) -> StoreResult<()>;

    fn find_session_by_key(&self, session_key: &str) -> StoreResult<Option<Session>>;

    fn find_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Replace a session row; a CLOSED row never goes back to ACTIVE
    fn update_session(&self, session: Session) -> StoreResult<()>;

    /// Set `last_activity_at` of the session if it is still ACTIVE
    ///
    /// # Returns
    /// `false`, leaving the row untouched, when the session is closed
    fn touch_session(&self, session_key: &str, at: DateTime<Utc>) -> StoreResult<bool>;

    fn active_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Insert a command and return its assigned identifier
    fn insert_command(&self, command: CommandRecord) -> StoreResult<u64>;

    fn update_command(&self, command: CommandRecord) -> StoreResult<()>;

    fn commands_for_session(&self, session_key: &str) -> StoreResult<Vec<CommandRecord>>;

    // --- jobs ---------------------------------------------------------------

    fn insert_job(&self, job: Job) -> StoreResult<()>;

    fn find_job(&self, job_id: &str) -> StoreResult<Option<Job>>;

    fn update_job(&self, job: Job) -> StoreResult<()>;

    /// Move a job to `next` when its current status allows it.
    ///
    /// Returns the status the job holds afterwards, which is the unchanged
    /// current status when the transition is refused.
    fn transition_job(
        &self,
        job_id: &str,
        next: JobStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<JobStatus>;

    fn jobs_by_owner(&self, user_id: &str) -> StoreResult<Vec<Job>>;

    /// Jobs whose status is not terminal
    fn unfinished_jobs(&self) -> StoreResult<Vec<Job>>;

    // --- authentication systems ---------------------------------------------

    fn insert_auth_system(&self, system: AuthSystem) -> StoreResult<()>;

    fn find_auth_system(&self, auth_system_id: &str) -> StoreResult<Option<AuthSystem>>;

    fn update_auth_system(&self, system: AuthSystem) -> StoreResult<()>;

    fn auth_systems(&self) -> StoreResult<Vec<AuthSystem>>;
}
