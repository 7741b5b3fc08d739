// ============================================================================
// File: packages/gridplane/src/backends/trait_def.rs
// ----------------------------------------------------------------------------
// JobBackend trait definition
// ============================================================================

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::async_task::AsyncTask;
use crate::backends::errors::BackendResult;
use crate::backends::types::{JobStatus, Queue, SubmitOptions, SubmittedJob};
use crate::remote::SshTarget;

/// Core job backend trait
///
/// Batch clusters and the cloud provider both implement this trait. Every
/// operation returns an AsyncTask; backends never expose async fn.
pub trait JobBackend: Send + Sync + std::fmt::Debug {
    /// Submit the script at `script_path`
    ///
    /// # Arguments
    /// * `script_path` - Local path of the job script
    /// * `options` - Submission options, including the remote output paths
    ///
    /// # Returns
    /// AsyncTask that resolves to the backend handle of the new job
    fn submit(
        &self,
        script_path: &Path,
        options: &SubmitOptions,
    ) -> AsyncTask<BackendResult<SubmittedJob>>;

    /// Cancel the job behind `handle`
    fn cancel(&self, handle: &str) -> AsyncTask<BackendResult<()>>;

    /// Current status of the job behind `handle`
    ///
    /// For the cloud backend, observing completion also releases the
    /// virtual machine.
    fn job_state(&self, handle: &str) -> AsyncTask<BackendResult<JobStatus>>;

    /// When the job started running, if it has
    fn job_start_time(&self, handle: &str) -> AsyncTask<BackendResult<Option<DateTime<Utc>>>>;

    /// Queues of the backend, optionally only the one named `filter`
    fn list_queues(&self, filter: Option<&str>) -> AsyncTask<BackendResult<Vec<Queue>>>;

    /// Account and host holding the files of the job behind `handle`
    fn file_target(&self, handle: &str) -> BackendResult<SshTarget>;

    /// Get the backend type identifier
    fn backend_type(&self) -> &'static str;
}
