// ============================================================================
// File: packages/gridplane/src/jobs/lifecycle.rs
// ----------------------------------------------------------------------------
// Job lifecycle operations for JobCoordinator.
//
// Provides methods for:
// - Submitting scripts to a machine's backend
// - Cancelling jobs
// - Polling status with guarded transitions
// - Start times, queue listings and the caller's job list
// ============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::{Job, JobCoordinator};
use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::backends::{JobStatus, Queue, SubmitOptions, SubmittedJob};
use crate::error::{GridError, GridResult};
use crate::ids::ObjectType;
use crate::session::SessionContext;
use crate::store::{CommandStatus, ServiceCategory};

/// Removes a job from the in-flight set when dropped
struct InFlight<'a> {
    coordinator: &'a JobCoordinator,
    job_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut polling) = self.coordinator.in_flight.lock() {
            polling.remove(&self.job_id);
        }
    }
}

impl JobCoordinator {
    /// Submit `script_path` to `machine_id`
    ///
    /// Output and error paths default to `<working_dir>/<job_id>.out` and
    /// `.err`. A backend failure is persisted as a FAILED job carrying the
    /// error message before the error is returned.
    ///
    /// # Arguments
    /// * `session_key` - Caller's session
    /// * `machine_id` - Target machine
    /// * `script_path` - Local path of the job script
    /// * `options` - Submission options
    ///
    /// # Returns
    /// AsyncTask that resolves to the persisted job
    pub fn submit(
        &self,
        session_key: &str,
        machine_id: &str,
        script_path: &Path,
        options: SubmitOptions,
    ) -> AsyncTask<GridResult<Job>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();
        let machine_id = machine_id.to_string();
        let script_path = script_path.to_path_buf();

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let description = format!("submit {} on {machine_id}", script_path.display());
            coordinator
                .sessions
                .start_command(&session_key, &description, ServiceCategory::Tms)?;

            let outcome = coordinator
                .submit_on_backend(&ctx, &machine_id, script_path, options)
                .await;

            let (status, object_id) = match &outcome {
                Ok(job) => (CommandStatus::Success, Some(job.job_id.as_str())),
                Err(_) => (CommandStatus::Failed, None),
            };
            coordinator.sessions.finish(
                &session_key,
                &description,
                ServiceCategory::Tms,
                status,
                object_id,
                true,
            )?;
            outcome
        })
        .spawn()
    }

    async fn submit_on_backend(
        &self,
        ctx: &SessionContext,
        machine_id: &str,
        script_path: PathBuf,
        mut options: SubmitOptions,
    ) -> GridResult<Job> {
        let owner = ctx.user_id().to_string();
        let (machine, backend) = self.backend_for(machine_id, &owner)?;

        let site = Some(machine.site.as_str()).filter(|s| !s.is_empty());
        let job_id = self
            .ids
            .next_id(ObjectType::Job, options.name.as_deref(), site)?;

        if options.working_dir.is_none() {
            options.working_dir = self
                .db
                .find_local_account(&owner, machine_id)?
                .map(|account| account.home)
                .filter(|home| !home.is_empty());
        }
        let prefix = options
            .working_dir
            .as_deref()
            .map(|dir| format!("{}/", dir.trim_end_matches('/')))
            .unwrap_or_default();
        if options.output_path.is_none() {
            options.output_path = Some(format!("{prefix}{job_id}.out"));
        }
        if options.error_path.is_none() {
            options.error_path = Some(format!("{prefix}{job_id}.err"));
        }

        let job = Job {
            job_id,
            machine_id: machine_id.to_string(),
            backend_handle: None,
            vm_id: None,
            name: options.name.clone().unwrap_or_else(|| {
                script_path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "job".to_string())
            }),
            status: JobStatus::Submitted,
            output_path: options.output_path.clone(),
            error_path: options.error_path.clone(),
            backend_params: options.specific_params.clone(),
            owner_user_id: owner,
            session_id: ctx.session.session_id.clone(),
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        };

        let outcome = match backend.submit(&script_path, &options).await {
            Ok(submitted) => submitted.map_err(GridError::from),
            Err(join) => Err(GridError::from(join)),
        };
        self.record_submission(job, outcome)
    }

    /// Persist the job as the backend left it: SUBMITTED with its handle, or
    /// FAILED with the error message, whichever way the submission failed
    pub(crate) fn record_submission(
        &self,
        mut job: Job,
        outcome: GridResult<SubmittedJob>,
    ) -> GridResult<Job> {
        match outcome {
            Ok(submitted) => {
                job.backend_handle = Some(submitted.handle);
                job.vm_id = submitted.vm_id;
                job.name = submitted.name;
                job.status = submitted.status;
                job.output_path = submitted.output_path.or(job.output_path);
                job.error_path = submitted.error_path.or(job.error_path);
                self.db.insert_job(job.clone())?;
                info!(
                    "Job {} submitted to {} as {}",
                    job.job_id,
                    job.machine_id,
                    job.backend_handle.as_deref().unwrap_or_default()
                );
                Ok(job)
            }
            Err(err) => {
                job.status = JobStatus::Failed;
                job.finished_at = Some(Utc::now());
                job.error_message = Some(err.to_string());
                warn!("Job {} failed to submit on {}: {}", job.job_id, job.machine_id, err);
                self.db.insert_job(job)?;
                Err(err)
            }
        }
    }

    /// Cancel a job; terminal jobs are left untouched
    pub fn cancel(&self, session_key: &str, job_id: &str) -> AsyncTask<GridResult<()>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();
        let job_id = job_id.to_string();

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let job = coordinator.load_job(&job_id)?;
            Self::require_owner(&ctx, &job, "cancel")?;
            if job.status.is_terminal() {
                debug!("Job {} already {}, nothing to cancel", job_id, job.status);
                return Ok(());
            }

            let description = format!("cancel {job_id}");
            coordinator
                .sessions
                .start_command(&session_key, &description, ServiceCategory::Tms)?;
            let outcome = coordinator.cancel_on_backend(&job).await;
            let status = if outcome.is_ok() {
                CommandStatus::Success
            } else {
                CommandStatus::Failed
            };
            coordinator.sessions.finish(
                &session_key,
                &description,
                ServiceCategory::Tms,
                status,
                None,
                true,
            )?;
            outcome
        })
        .spawn()
    }

    async fn cancel_on_backend(&self, job: &Job) -> GridResult<()> {
        if let Some(handle) = &job.backend_handle {
            let backend = self.backend_for_job(&job)?;
            backend.cancel(handle).await??;
        }
        let status = self
            .db
            .transition_job(&job.job_id, JobStatus::Cancelled, Utc::now())?;
        info!("Job {} is {}", job.job_id, status);
        Ok(())
    }

    /// Refresh a job's status from its backend
    ///
    /// Terminal jobs answer from storage without touching the backend, as do
    /// jobs whose status is already being queried.
    pub fn poll_status(&self, job_id: &str) -> AsyncTask<GridResult<JobStatus>> {
        let coordinator = self.clone();
        let job_id = job_id.to_string();
        AsyncTaskBuilder::new(async move { coordinator.refresh_status(&job_id).await }).spawn()
    }

    pub(crate) async fn refresh_status(&self, job_id: &str) -> GridResult<JobStatus> {
        let job = self.load_job(job_id)?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }

        let _guard = {
            let mut polling = self
                .in_flight
                .lock()
                .map_err(|e| GridError::system(format!("Failed to acquire write lock: {e}")))?;
            if !polling.insert(job_id.to_string()) {
                return Ok(job.status);
            }
            InFlight {
                coordinator: self,
                job_id: job_id.to_string(),
            }
        };

        let handle = job.backend_handle.as_deref().ok_or_else(|| {
            GridError::system(format!("Job {job_id} has no backend handle"))
        })?;
        let backend = self.backend_for_job(&job)?;
        let observed = backend.job_state(handle).await??;

        let status = self.db.transition_job(job_id, observed, Utc::now())?;
        if status != job.status {
            info!("Job {job_id}: {} -> {status}", job.status);
        }
        Ok(status)
    }

    /// When the job started running, if it has
    pub fn job_start_time(
        &self,
        session_key: &str,
        job_id: &str,
    ) -> AsyncTask<GridResult<Option<DateTime<Utc>>>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();
        let job_id = job_id.to_string();

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let job = coordinator.load_job(&job_id)?;
            Self::require_owner(&ctx, &job, "inspect")?;
            if job.started_at.is_some() {
                return Ok(job.started_at);
            }
            let Some(handle) = job.backend_handle.as_deref() else {
                return Ok(None);
            };
            let backend = coordinator.backend_for_job(&job)?;
            Ok(backend.job_start_time(handle).await??)
        })
        .spawn()
    }

    /// Queues of a machine, optionally only the one named `filter`
    pub fn list_queues(
        &self,
        session_key: &str,
        machine_id: &str,
        filter: Option<&str>,
    ) -> AsyncTask<GridResult<Vec<Queue>>> {
        let coordinator = self.clone();
        let session_key = session_key.to_string();
        let machine_id = machine_id.to_string();
        let filter = filter.map(str::to_string);

        AsyncTaskBuilder::new(async move {
            let ctx = coordinator.sessions.authorize(&session_key)?;
            let (_, backend) = coordinator.backend_for(&machine_id, ctx.user_id())?;
            Ok(backend.list_queues(filter.as_deref()).await??)
        })
        .spawn()
    }

    /// The caller's jobs, oldest first
    pub fn list_jobs(&self, session_key: &str) -> GridResult<Vec<Job>> {
        let ctx = self.sessions.authorize(session_key)?;
        let mut jobs = self.db.jobs_by_owner(ctx.user_id())?;
        jobs.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(jobs)
    }
}
