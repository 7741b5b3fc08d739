// ============================================================================
// File: packages/gridplane/src/jobs/output.rs
// ----------------------------------------------------------------------------
// Output retrieval for JobCoordinator: remote stdout/stderr files are copied
// into unique staging files on the local host.
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use super::{Job, JobCoordinator, JobResult};
use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::backends::JobStatus;
use crate::error::{GridError, GridResult};
use crate::store::{CommandStatus, ServiceCategory};

/// Drop a leading `host:` qualifier from a stored path
pub(crate) fn strip_host_prefix(path: &str) -> &str {
    match path.split_once(':') {
        Some((host, rest)) if !host.is_empty() && !host.contains('/') => rest,
        _ => path,
    }
}

impl JobCoordinator {
    /// Copy a job's output and error files into the staging directory
    ///
    /// COMPLETED jobs move to DOWNLOADED once both files are copied.
    pub fn get_job_output(&self, session_key: &str, job_id: &str) -> AsyncTask<GridResult<JobResult>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();
        let job_id = job_id.to_string();

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let job = coordinator.load_job(&job_id)?;
            Self::require_owner(&ctx, &job, "retrieve the output of")?;

            let description = format!("get output {job_id}");
            coordinator
                .sessions
                .start_command(&session_key, &description, ServiceCategory::Fms)?;
            let outcome = coordinator.retrieve(&job).await;
            let status = if outcome.is_ok() {
                CommandStatus::Success
            } else {
                CommandStatus::Failed
            };
            coordinator.sessions.finish(
                &session_key,
                &description,
                ServiceCategory::Fms,
                status,
                None,
                true,
            )?;
            outcome
        })
        .spawn()
    }

    /// Retrieve the output of every job of the caller that recorded output
    /// and error paths, whatever its status
    ///
    /// A failed retrieval is logged and skipped without aborting the others.
    pub fn get_completed_jobs_output(&self, session_key: &str) -> AsyncTask<GridResult<Vec<JobResult>>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let description = "get completed jobs output".to_string();
            coordinator
                .sessions
                .start_command(&session_key, &description, ServiceCategory::Fms)?;

            let mut results = Vec::new();
            let with_files = coordinator
                .db
                .jobs_by_owner(ctx.user_id())?
                .into_iter()
                .filter(|job| job.output_path.is_some() && job.error_path.is_some());
            for job in with_files {
                match coordinator.retrieve(&job).await {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("Skipping output of job {}: {}", job.job_id, e),
                }
            }

            coordinator.sessions.finish(
                &session_key,
                &description,
                ServiceCategory::Fms,
                CommandStatus::Success,
                None,
                true,
            )?;
            Ok(results)
        })
        .spawn()
    }

    async fn retrieve(&self, job: &Job) -> GridResult<JobResult> {
        let unknown = || GridError::UnknownJobId(job.job_id.clone());
        let (Some(remote_out), Some(remote_err)) = (&job.output_path, &job.error_path) else {
            return Err(unknown());
        };
        let handle = job.backend_handle.as_deref().ok_or_else(unknown)?;

        let backend = self.backend_for_job(job)?;
        let target = backend.file_target(handle)?;

        let local_out = self.staging_file(&job.job_id, ".out")?;
        let local_err = self.staging_file(&job.job_id, ".err")?;

        let shell = Arc::clone(&self.shell);
        let remote_out = strip_host_prefix(remote_out).to_string();
        let remote_err = strip_host_prefix(remote_err).to_string();
        let (out, err) = (local_out.clone(), local_err.clone());
        let copied = tokio::task::spawn_blocking(move || {
            shell.copy_files(&target, &remote_out, &remote_err, &out, &err)
        })
        .await?;

        if let Err(e) = copied {
            for staged in [&local_out, &local_err] {
                if let Err(cleanup) = std::fs::remove_file(staged) {
                    warn!("Failed to remove staging file {}: {}", staged.display(), cleanup);
                }
            }
            return Err(e.into());
        }

        if job.status == JobStatus::Completed {
            self.db
                .transition_job(&job.job_id, JobStatus::Downloaded, Utc::now())?;
        }
        info!("Output of job {} staged in {}", job.job_id, local_out.display());

        Ok(JobResult {
            job_id: job.job_id.clone(),
            output_path: local_out,
            error_path: local_err,
        })
    }

    /// Unique, persistent file in the staging directory
    fn staging_file(&self, job_id: &str, suffix: &str) -> GridResult<PathBuf> {
        let file = tempfile::Builder::new()
            .prefix(&format!("job_output-{job_id}-"))
            .suffix(suffix)
            .tempfile_in(&self.staging_dir)
            .map_err(|e| GridError::system(format!("Failed to create staging file: {e}")))?;
        let (_, path) = file
            .keep()
            .map_err(|e| GridError::system(format!("Failed to keep staging file: {e}")))?;
        Ok(path)
    }
}
