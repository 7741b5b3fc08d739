// ============================================================================
// File: packages/gridplane/src/backends/batch/mod.rs
// ----------------------------------------------------------------------------
// Batch backend: drives SLURM, PBS or SGE on a cluster front-end over SSH.
// ============================================================================

mod scheduler;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::backends::staging::{remote_exec, remote_script_path, remote_upload, stage_script};
use crate::backends::{
    BackendError, BackendResult, BatchConfig, JobBackend, JobStatus, Queue, SubmitOptions,
    SubmittedJob,
};
use crate::remote::{CommandOutcome, RemoteError, RemoteShell, SshTarget};

/// Backend for one batch machine
#[derive(Debug, Clone)]
pub struct BatchBackend {
    machine_id: String,
    config: BatchConfig,
    target: SshTarget,
    shell: Arc<dyn RemoteShell>,
}

impl BatchBackend {
    /// Create a backend acting as `login` on the front-end, or as the
    /// configured default user when the caller has no local account
    pub fn new<M: Into<String>>(
        machine_id: M,
        config: BatchConfig,
        login: Option<&str>,
        shell: Arc<dyn RemoteShell>,
    ) -> Self {
        let user = login.unwrap_or(config.default_user.as_str());
        let mut target = SshTarget::new(config.host.clone(), user).with_port(config.port);
        if let Some(identity) = &config.identity {
            target = target.with_identity(identity.clone());
        }
        Self {
            machine_id: machine_id.into(),
            config,
            target,
            shell,
        }
    }

    async fn exec(&self, command: String, working_dir: Option<String>) -> BackendResult<CommandOutcome> {
        remote_exec(
            Arc::clone(&self.shell),
            self.target.clone(),
            command,
            working_dir,
            false,
        )
        .await
    }

    /// Stdout of a command that must succeed
    async fn exec_ok(&self, command: String, working_dir: Option<String>) -> BackendResult<String> {
        let outcome = self.exec(command.clone(), working_dir).await?;
        outcome
            .into_stdout(&command)
            .map_err(|e| self.scheduler_error(e))
    }

    fn scheduler_error(&self, err: RemoteError) -> BackendError {
        match err {
            RemoteError::CommandFailed { .. } => BackendError::Scheduler {
                backend: self.config.scheduler.backend_name(),
                details: err.to_string(),
            },
            other => BackendError::Remote(other),
        }
    }

    async fn submit_job(
        self,
        script_path: std::path::PathBuf,
        options: SubmitOptions,
    ) -> BackendResult<SubmittedJob> {
        let scheduler = self.config.scheduler;
        let staged = stage_script(&script_path, scheduler.macros()).await?;

        let remote_script = remote_script_path(options.working_dir.as_deref());
        remote_upload(
            Arc::clone(&self.shell),
            self.target.clone(),
            staged.path().to_path_buf(),
            remote_script.clone(),
            0o700,
        )
        .await?;

        let command = scheduler.submit_command(&remote_script, &options);
        debug!("Submitting on {}: {command}", self.machine_id);
        let stdout = self.exec_ok(command, options.working_dir.clone()).await?;
        let native_id = scheduler.parse_submit_output(&stdout)?;

        info!(
            "Submitted {} job {native_id} on {}",
            scheduler, self.machine_id
        );

        let name = options.name.clone().unwrap_or_else(|| {
            script_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string())
        });

        Ok(SubmittedJob {
            handle: native_id,
            vm_id: None,
            name,
            output_path: options.output_path,
            error_path: options.error_path,
            status: JobStatus::Submitted,
        })
    }

    async fn query_state(self, handle: String) -> BackendResult<JobStatus> {
        let scheduler = self.config.scheduler;
        for command in scheduler.status_commands(&handle) {
            let outcome = self.exec(command, None).await?;
            if let Some(status) = scheduler.parse_status(&handle, &outcome)? {
                return Ok(status);
            }
        }
        debug!("{scheduler} no longer knows job {handle}; treating it as completed");
        Ok(JobStatus::Completed)
    }
}

impl JobBackend for BatchBackend {
    fn submit(
        &self,
        script_path: &Path,
        options: &SubmitOptions,
    ) -> AsyncTask<BackendResult<SubmittedJob>> {
        let backend = self.clone();
        let script_path = script_path.to_path_buf();
        let options = options.clone();
        AsyncTaskBuilder::new(async move { backend.submit_job(script_path, options).await }).spawn()
    }

    fn cancel(&self, handle: &str) -> AsyncTask<BackendResult<()>> {
        let backend = self.clone();
        let handle = handle.to_string();
        AsyncTaskBuilder::new(async move {
            let command = backend.config.scheduler.cancel_command(&handle);
            backend.exec_ok(command, None).await?;
            info!("Cancelled job {handle} on {}", backend.machine_id);
            Ok(())
        })
        .spawn()
    }

    fn job_state(&self, handle: &str) -> AsyncTask<BackendResult<JobStatus>> {
        let backend = self.clone();
        let handle = handle.to_string();
        AsyncTaskBuilder::new(async move { backend.query_state(handle).await }).spawn()
    }

    fn job_start_time(&self, handle: &str) -> AsyncTask<BackendResult<Option<DateTime<Utc>>>> {
        let backend = self.clone();
        let handle = handle.to_string();
        AsyncTaskBuilder::new(async move {
            let scheduler = backend.config.scheduler;
            let outcome = backend
                .exec(scheduler.start_time_command(&handle), None)
                .await?;
            match outcome {
                CommandOutcome::Completed {
                    exit_code: 0,
                    stdout,
                    ..
                } => Ok(scheduler.parse_start_time(&handle, &stdout)),
                _ => Ok(None),
            }
        })
        .spawn()
    }

    fn list_queues(&self, filter: Option<&str>) -> AsyncTask<BackendResult<Vec<Queue>>> {
        let backend = self.clone();
        let filter = filter.map(str::to_string);
        AsyncTaskBuilder::new(async move {
            let scheduler = backend.config.scheduler;
            let stdout = backend
                .exec_ok(scheduler.queues_command().to_string(), None)
                .await?;
            let mut queues = scheduler.parse_queues(&stdout);
            if let Some(name) = filter {
                queues.retain(|q| q.name == name);
            }
            Ok(queues)
        })
        .spawn()
    }

    fn file_target(&self, _handle: &str) -> BackendResult<SshTarget> {
        Ok(self.target.clone())
    }

    fn backend_type(&self) -> &'static str {
        self.config.scheduler.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BatchScheduler;
    use crate::testing::MockShell;

    fn backend(scheduler: BatchScheduler, shell: Arc<MockShell>) -> BatchBackend {
        BatchBackend::new(
            "cluster",
            BatchConfig::new("front.example.org", scheduler, "grid"),
            Some("alice"),
            shell,
        )
    }

    #[tokio::test]
    async fn submit_uploads_rewritten_script_and_parses_native_id() {
        let shell = Arc::new(MockShell::new());
        shell.respond("sbatch", 0, "4242;cluster\n", "");

        let script = tempfile::NamedTempFile::new().expect("script");
        std::fs::write(script.path(), "#!/bin/sh\necho $GRID_JOB_NAME\n").expect("write");

        let options = SubmitOptions::new()
            .with_name("render")
            .with_working_dir("/home/alice")
            .with_output_paths("/home/alice/J_1.out", "/home/alice/J_1.err");
        let submitted = backend(BatchScheduler::Slurm, Arc::clone(&shell))
            .submit(script.path(), &options)
            .await
            .expect("join")
            .expect("submit");

        assert_eq!(submitted.handle, "4242");
        assert_eq!(submitted.name, "render");
        assert_eq!(submitted.status, JobStatus::Submitted);

        let uploads = shell.uploads();
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].remote_path.starts_with("/home/alice/gridplane-"));
        assert_eq!(uploads[0].mode, 0o700);
        assert_eq!(uploads[0].content, "#!/bin/sh\necho $SLURM_JOB_NAME\n");

        let commands = shell.commands();
        assert!(commands.iter().any(|c| c.starts_with("sbatch --parsable -J 'render'")));
        assert!(shell.targets().iter().all(|t| t.user == "alice"));
    }

    #[tokio::test]
    async fn rejected_submission_is_a_scheduler_error() {
        let shell = Arc::new(MockShell::new());
        shell.respond("qsub", 1, "", "qsub: Unknown queue");

        let script = tempfile::NamedTempFile::new().expect("script");
        let err = backend(BatchScheduler::Pbs, shell)
            .submit(script.path(), &SubmitOptions::new())
            .await
            .expect("join")
            .expect_err("rejected");
        assert!(matches!(err, BackendError::Scheduler { backend: "PBS", .. }));
    }

    #[tokio::test]
    async fn slurm_falls_back_to_accounting_then_to_completed() {
        let shell = Arc::new(MockShell::new());
        shell.respond("squeue", 0, "", "");
        shell.respond("sacct", 0, "FAILED\n", "");

        let status = backend(BatchScheduler::Slurm, Arc::clone(&shell))
            .job_state("77")
            .await
            .expect("join")
            .expect("state");
        assert_eq!(status, JobStatus::Failed);

        let forgotten = Arc::new(MockShell::new());
        forgotten.respond("squeue", 0, "", "");
        forgotten.respond("sacct", 0, "", "");
        let status = backend(BatchScheduler::Slurm, forgotten)
            .job_state("78")
            .await
            .expect("join")
            .expect("state");
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn queue_filter_keeps_only_the_named_queue() {
        let shell = Arc::new(MockShell::new());
        shell.respond("qconf", 0, "all.q\nlong.q\n", "");

        let queues = backend(BatchScheduler::Sge, shell)
            .list_queues(Some("long.q"))
            .await
            .expect("join")
            .expect("queues");
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].name, "long.q");
    }
}
