// ============================================================================
// File: packages/gridplane/src/store/memory.rs
// ----------------------------------------------------------------------------
// In-process implementation of the storage collaborator.
//
// All tables live behind a single RwLock so each accessor is atomic. Open
// transactions only ever stage placeholder reservations; counters are bumped
// eagerly so a rolled back reservation never hands out its value again.
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{
    AuthAccount, CommandRecord, Database, LocalAccount, ObjectStatus, StoreError, StoreResult,
    TxnId, UserRecord,
};
use crate::auth::AuthSystem;
use crate::backends::JobStatus;
use crate::ids::ObjectType;
use crate::jobs::Job;
use crate::session::{Session, SessionState};

#[derive(Debug, Default)]
struct Tables {
    counters: HashMap<ObjectType, u64>,
    placeholders: HashMap<ObjectType, BTreeMap<u64, Option<String>>>,
    open_transactions: HashMap<TxnId, Vec<(ObjectType, u64)>>,
    next_txn: u64,

    users: HashMap<String, UserRecord>,
    local_accounts: Vec<LocalAccount>,
    auth_accounts: Vec<AuthAccount>,

    sessions: HashMap<String, Session>,
    commands: BTreeMap<u64, CommandRecord>,
    next_command: u64,

    jobs: BTreeMap<String, Job>,
    auth_systems: BTreeMap<String, AuthSystem>,
}

/// Storage backed by process memory
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<Tables>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|e| StoreError::Poisoned(format!("Failed to acquire read lock: {e}")))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|e| StoreError::Poisoned(format!("Failed to acquire write lock: {e}")))
    }
}

impl Database for MemoryDatabase {
    fn begin_transaction(&self) -> StoreResult<TxnId> {
        let mut tables = self.write()?;
        tables.next_txn += 1;
        let txn = TxnId(tables.next_txn);
        tables.open_transactions.insert(txn, Vec::new());
        Ok(txn)
    }

    fn commit(&self, txn: TxnId) -> StoreResult<()> {
        let mut tables = self.write()?;
        let staged = tables
            .open_transactions
            .remove(&txn)
            .ok_or(StoreError::UnknownTransaction(txn))?;
        for (object_type, key) in staged {
            tables
                .placeholders
                .entry(object_type)
                .or_default()
                .insert(key, None);
        }
        Ok(())
    }

    fn rollback(&self, txn: TxnId) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables
            .open_transactions
            .remove(&txn)
            .map(|_| ())
            .ok_or(StoreError::UnknownTransaction(txn))
    }

    fn reserve_row(&self, txn: TxnId, object_type: ObjectType) -> StoreResult<u64> {
        let mut tables = self.write()?;
        if !tables.open_transactions.contains_key(&txn) {
            return Err(StoreError::UnknownTransaction(txn));
        }
        let counter = tables.counters.entry(object_type).or_insert(0);
        *counter += 1;
        let key = *counter;
        if let Some(staged) = tables.open_transactions.get_mut(&txn) {
            staged.push((object_type, key));
        }
        Ok(key)
    }

    fn object_id_exists(&self, object_type: ObjectType, object_id: &str) -> StoreResult<bool> {
        let tables = self.read()?;
        let reserved = tables
            .placeholders
            .get(&object_type)
            .map(|rows| rows.values().any(|id| id.as_deref() == Some(object_id)))
            .unwrap_or(false);
        if reserved {
            return Ok(true);
        }
        let owned = match object_type {
            ObjectType::User => tables.users.contains_key(object_id),
            ObjectType::Job => tables.jobs.contains_key(object_id),
            ObjectType::AuthSystem => tables.auth_systems.contains_key(object_id),
            ObjectType::Machine | ObjectType::FileTransfer | ObjectType::Work => false,
        };
        Ok(owned)
    }

    fn assign_object_id(
        &self,
        object_type: ObjectType,
        key: u64,
        object_id: &str,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        let row = tables
            .placeholders
            .get_mut(&object_type)
            .and_then(|rows| rows.get_mut(&key))
            .ok_or_else(|| StoreError::Missing {
                table: object_type.table_name(),
                key: key.to_string(),
            })?;
        *row = Some(object_id.to_string());
        Ok(())
    }

    fn insert_user(&self, user: UserRecord) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.user_id) {
            return Err(StoreError::Duplicate {
                table: "users",
                key: user.user_id,
            });
        }
        tables.users.insert(user.user_id.clone(), user);
        Ok(())
    }

    fn find_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.read()?.users.get(user_id).cloned())
    }

    fn insert_local_account(&self, account: LocalAccount) -> StoreResult<()> {
        let mut tables = self.write()?;
        tables
            .local_accounts
            .retain(|a| !(a.user_id == account.user_id && a.machine_id == account.machine_id));
        tables.local_accounts.push(account);
        Ok(())
    }

    fn find_local_account(
        &self,
        user_id: &str,
        machine_id: &str,
    ) -> StoreResult<Option<LocalAccount>> {
        Ok(self
            .read()?
            .local_accounts
            .iter()
            .find(|a| a.user_id == user_id && a.machine_id == machine_id)
            .cloned())
    }

    fn insert_auth_account(&self, account: AuthAccount) -> StoreResult<()> {
        self.write()?.auth_accounts.push(account);
        Ok(())
    }

    fn auth_accounts_for_user(&self, user_id: &str) -> StoreResult<Vec<AuthAccount>> {
        Ok(self
            .read()?
            .auth_accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    fn set_auth_accounts_status(
        &self,
        auth_system_id: &str,
        status: ObjectStatus,
    ) -> StoreResult<usize> {
        let mut tables = self.write()?;
        let mut updated = 0;
        for account in tables
            .auth_accounts
            .iter_mut()
            .filter(|a| a.auth_system_id == auth_system_id)
        {
            account.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    fn insert_session(&self, session: Session) -> StoreResult<()> {
        let mut tables = self.write()?;
        let id_taken = tables
            .sessions
            .values()
            .any(|s| s.session_id == session.session_id);
        if tables.sessions.contains_key(&session.session_key) || id_taken {
            return Err(StoreError::Duplicate {
                table: "vsession",
                key: session.session_id,
            });
        }
        tables.sessions.insert(session.session_key.clone(), session);
        Ok(())
    }

    fn find_session_by_key(&self, session_key: &str) -> StoreResult<Option<Session>> {
        Ok(self.read()?.sessions.get(session_key).cloned())
    }

    fn find_session_by_id(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self
            .read()?
            .sessions
            .values()
            .find(|s| s.session_id == session_id)
            .cloned())
    }

    fn update_session(&self, session: Session) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.sessions.get_mut(&session.session_key) {
            Some(row) if row.state == SessionState::Closed && session.state == SessionState::Active => {
                Err(StoreError::SessionClosed(session.session_id))
            }
            Some(row) => {
                *row = session;
                Ok(())
            }
            None => Err(StoreError::Missing {
                table: "vsession",
                key: session.session_id,
            }),
        }
    }

    fn touch_session(&self, session_key: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tables = self.write()?;
        match tables.sessions.get_mut(session_key) {
            Some(row) if row.state == SessionState::Active => {
                row.last_activity_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Missing {
                table: "vsession",
                key: session_key.to_string(),
            }),
        }
    }

    fn active_sessions(&self) -> StoreResult<Vec<Session>> {
        Ok(self
            .read()?
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Active)
            .cloned()
            .collect())
    }

    fn insert_command(&self, mut command: CommandRecord) -> StoreResult<u64> {
        let mut tables = self.write()?;
        tables.next_command += 1;
        command.id = tables.next_command;
        let id = command.id;
        tables.commands.insert(id, command);
        Ok(id)
    }

    fn update_command(&self, command: CommandRecord) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.commands.get_mut(&command.id) {
            Some(row) => {
                *row = command;
                Ok(())
            }
            None => Err(StoreError::Missing {
                table: "command",
                key: command.id.to_string(),
            }),
        }
    }

    fn commands_for_session(&self, session_key: &str) -> StoreResult<Vec<CommandRecord>> {
        Ok(self
            .read()?
            .commands
            .values()
            .filter(|c| c.session_key == session_key)
            .cloned()
            .collect())
    }

    fn insert_job(&self, job: Job) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate {
                table: "job",
                key: job.job_id,
            });
        }
        tables.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn find_job(&self, job_id: &str) -> StoreResult<Option<Job>> {
        Ok(self.read()?.jobs.get(job_id).cloned())
    }

    fn update_job(&self, job: Job) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.jobs.get_mut(&job.job_id) {
            Some(row) => {
                *row = job;
                Ok(())
            }
            None => Err(StoreError::Missing {
                table: "job",
                key: job.job_id,
            }),
        }
    }

    fn transition_job(
        &self,
        job_id: &str,
        next: JobStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<JobStatus> {
        let mut tables = self.write()?;
        let job = tables.jobs.get_mut(job_id).ok_or_else(|| StoreError::Missing {
            table: "job",
            key: job_id.to_string(),
        })?;
        if !job.status.can_transition_to(next) {
            return Ok(job.status);
        }
        job.status = next;
        if next == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(at);
        }
        if next.is_terminal() && job.finished_at.is_none() {
            job.finished_at = Some(at);
        }
        Ok(next)
    }

    fn jobs_by_owner(&self, user_id: &str) -> StoreResult<Vec<Job>> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| j.owner_user_id == user_id)
            .cloned()
            .collect())
    }

    fn unfinished_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self
            .read()?
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }

    fn insert_auth_system(&self, system: AuthSystem) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.auth_systems.contains_key(&system.auth_system_id) {
            return Err(StoreError::Duplicate {
                table: "authsystem",
                key: system.auth_system_id,
            });
        }
        tables
            .auth_systems
            .insert(system.auth_system_id.clone(), system);
        Ok(())
    }

    fn find_auth_system(&self, auth_system_id: &str) -> StoreResult<Option<AuthSystem>> {
        Ok(self.read()?.auth_systems.get(auth_system_id).cloned())
    }

    fn update_auth_system(&self, system: AuthSystem) -> StoreResult<()> {
        let mut tables = self.write()?;
        match tables.auth_systems.get_mut(&system.auth_system_id) {
            Some(row) => {
                *row = system;
                Ok(())
            }
            None => Err(StoreError::Missing {
                table: "authsystem",
                key: system.auth_system_id,
            }),
        }
    }

    fn auth_systems(&self) -> StoreResult<Vec<AuthSystem>> {
        Ok(self.read()?.auth_systems.values().cloned().collect())
    }
}
