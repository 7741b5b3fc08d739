// ============================================================================
// File: packages/gridplane/src/jobs/mod.rs
// ----------------------------------------------------------------------------
// Job lifecycle coordination.
//
// The coordinator ties sessions, identifiers, machine configuration and
// backends together:
// - Submission with persisted job records, failed submissions included
// - Status polling with guarded transitions; terminal states are final
// - Cancellation by the owner or an admin
// - Output retrieval into local staging files
// ============================================================================

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backends::{
    BackendDeps, JobBackend, JobStatus, MachineConfig, MachineRegistry, RpcTransport,
    create_backend,
};
use crate::error::{GridError, GridResult};
use crate::ids::IdentifierAllocator;
use crate::remote::RemoteShell;
use crate::session::{SessionAuthority, SessionContext};
use crate::store::Database;

// Submodules
mod lifecycle;
mod monitor;
mod output;

#[cfg(test)]
mod tests;

pub use monitor::JobMonitor;

/// A submitted job as persisted by the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub machine_id: String,

    /// Native batch id or composite cloud handle; absent when submission failed
    pub backend_handle: Option<String>,
    pub vm_id: Option<String>,
    pub name: String,
    pub status: JobStatus,

    /// Remote stdout path, possibly `host:`-prefixed
    pub output_path: Option<String>,
    /// Remote stderr path, possibly `host:`-prefixed
    pub error_path: Option<String>,

    /// Backend-specific parameters given at submission, reused by later calls
    #[serde(default)]
    pub backend_params: String,

    pub owner_user_id: String,
    pub session_id: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Local copies of a job's output files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub output_path: PathBuf,
    pub error_path: PathBuf,
}

/// Submits, tracks, cancels and collects jobs
#[derive(Debug, Clone)]
pub struct JobCoordinator {
    pub(crate) db: Arc<dyn Database>,
    pub(crate) sessions: SessionAuthority,
    pub(crate) ids: Arc<IdentifierAllocator>,
    pub(crate) machines: Arc<MachineRegistry>,
    pub(crate) shell: Arc<dyn RemoteShell>,
    pub(crate) rpc: Arc<dyn RpcTransport>,

    /// Directory receiving retrieved output files
    pub(crate) staging_dir: PathBuf,

    /// Jobs whose backend status query is in progress
    pub(crate) in_flight: Arc<Mutex<HashSet<String>>>,
}

impl JobCoordinator {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: SessionAuthority,
        ids: Arc<IdentifierAllocator>,
        machines: Arc<MachineRegistry>,
        shell: Arc<dyn RemoteShell>,
        rpc: Arc<dyn RpcTransport>,
    ) -> Self {
        Self {
            db,
            sessions,
            ids,
            machines,
            shell,
            rpc,
            staging_dir: std::env::temp_dir(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Backend for `machine_id`, acting as `user_id`'s local account there
    pub(crate) fn backend_for(
        &self,
        machine_id: &str,
        user_id: &str,
    ) -> GridResult<(MachineConfig, Arc<dyn JobBackend>)> {
        let machine = self.machines.get(machine_id)?;
        let deps = self.deps_for(machine_id, user_id)?;
        let backend = create_backend(&machine, &deps);
        Ok((machine, backend))
    }

    /// Backend acting on an already submitted job
    pub(crate) fn backend_for_job(&self, job: &Job) -> GridResult<Arc<dyn JobBackend>> {
        let machine = self.machines.get(&job.machine_id)?;
        let deps = self
            .deps_for(&job.machine_id, &job.owner_user_id)?
            .with_job_params(job.backend_params.clone());
        Ok(create_backend(&machine, &deps))
    }

    fn deps_for(&self, machine_id: &str, user_id: &str) -> GridResult<BackendDeps> {
        let deps = BackendDeps::new(Arc::clone(&self.shell), Arc::clone(&self.rpc));
        Ok(match self.db.find_local_account(user_id, machine_id)? {
            Some(account) => deps.with_login(account.login),
            None => deps,
        })
    }

    pub(crate) fn load_job(&self, job_id: &str) -> GridResult<Job> {
        self.db
            .find_job(job_id)?
            .ok_or_else(|| GridError::UnknownJobId(job_id.to_string()))
    }

    /// Fail with PermissionDenied unless the caller owns the job or is an admin
    pub(crate) fn require_owner(ctx: &SessionContext, job: &Job, operation: &str) -> GridResult<()> {
        if job.owner_user_id == ctx.user_id() || ctx.is_admin() {
            Ok(())
        } else {
            Err(GridError::PermissionDenied(format!(
                "Only the owner of {} or an admin may {operation} it",
                job.job_id
            )))
        }
    }
}
