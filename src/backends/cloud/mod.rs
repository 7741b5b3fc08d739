// ============================================================================
// File: packages/gridplane/src/backends/cloud/mod.rs
// ----------------------------------------------------------------------------
// Cloud backend: every job gets its own virtual machine.
//
// Submission allocates a VM through the provider's RPC API, waits for it to
// boot and accept SSH, then starts the script in the background. The job is
// tracked by a composite `pid@vmUser@vmAddress@vmId` handle; the VM is
// stopped as soon as a status probe finds the process gone.
// ============================================================================

pub mod config;
mod handle;
mod rpc;
mod template;
mod vm_info;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{Value, json};

pub use config::CloudConfig;
pub use handle::VmJobHandle;
pub use rpc::{HttpRpcTransport, RpcTransport, provider_result};
pub use template::kvm_template;
pub use vm_info::VmInfo;

use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::backends::macros::JobMacros;
use crate::backends::staging::{remote_exec, remote_script_path, remote_upload, stage_script};
use crate::backends::{
    BackendError, BackendResult, JobBackend, JobStatus, Queue, SubmitOptions, SubmittedJob,
};
use crate::remote::{RemoteShell, SshTarget, shell_quote};

/// Shell-level stand-ins for the job macros inside a VM
pub const CLOUD_MACROS: JobMacros = JobMacros {
    job_id: "$$",
    job_name: "$(ps -o comm= -p $$)",
    num_nodes: "$(wc -l ${GRID_JOB_NODEFILE} | cut -d' ' -f1)",
};

/// Backend for one cloud endpoint
#[derive(Debug, Clone)]
pub struct CloudBackend {
    machine_id: String,
    config: CloudConfig,

    /// Specific parameters the job was submitted with
    job_params: String,
    shell: Arc<dyn RemoteShell>,
    rpc: Arc<dyn RpcTransport>,
}

impl CloudBackend {
    pub fn new<M: Into<String>>(
        machine_id: M,
        config: CloudConfig,
        shell: Arc<dyn RemoteShell>,
        rpc: Arc<dyn RpcTransport>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            config,
            job_params: String::new(),
            shell,
            rpc,
        }
    }

    /// Act on a job submitted with `params`, so the endpoint, credentials
    /// and VM key it was started with are used again
    pub fn with_job_params<P: Into<String>>(mut self, params: P) -> Self {
        self.job_params = params.into();
        self
    }

    fn job_config(&self) -> BackendResult<CloudConfig> {
        self.config.with_user_params(&self.job_params)
    }

    /// Call `method` on the provider, prepending the session string
    async fn call(
        &self,
        config: &CloudConfig,
        method: &str,
        mut params: Vec<Value>,
    ) -> BackendResult<Value> {
        params.insert(0, Value::String(config.session_string()?));
        let raw = self
            .rpc
            .call(&config.endpoint, method, params)
            .await??;
        provider_result(method, raw)
    }

    async fn vm_info(&self, config: &CloudConfig, vm_id: i64) -> BackendResult<VmInfo> {
        let xml = self.call(config, "one.vm.info", vec![json!(vm_id)]).await?;
        match xml {
            Value::String(document) => Ok(VmInfo::parse(&document)),
            other => Err(BackendError::Rpc {
                method: "one.vm.info".to_string(),
                details: format!("Expected an XML document, got {other}"),
            }),
        }
    }

    async fn vm_action(&self, config: &CloudConfig, action: &str, vm_id: i64) -> BackendResult<()> {
        self.call(config, "one.vm.action", vec![json!(action), json!(vm_id)])
            .await?;
        info!("VM {vm_id} on {}: {action}", self.machine_id);
        Ok(())
    }

    fn vm_target(config: &CloudConfig, vm_user: &str, address: &str) -> SshTarget {
        let target = SshTarget::new(address, vm_user);
        if config.vm_user_key.is_empty() {
            target
        } else {
            target.with_identity(config.vm_user_key.clone())
        }
    }

    async fn submit_job(
        self,
        script_path: PathBuf,
        options: SubmitOptions,
    ) -> BackendResult<SubmittedJob> {
        let config = self.job_config()?.with_user_params(&options.specific_params)?;
        if config.vm_user.is_empty() {
            return Err(BackendError::InvalidConfig {
                backend: "Cloud",
                details: "No virtual machine user configured".to_string(),
            });
        }
        let template = kvm_template(&options, &config)?;
        let staged = stage_script(&script_path, CLOUD_MACROS).await?;

        let allocated = self
            .call(&config, "one.vm.allocate", vec![json!(template), json!(false)])
            .await?;
        let vm_id = allocated
            .as_i64()
            .ok_or_else(|| BackendError::Rpc {
                method: "one.vm.allocate".to_string(),
                details: format!("Expected a VM id, got {allocated}"),
            })?;
        info!("Virtual machine {vm_id} allocated on {}", self.machine_id);

        match self.launch(&config, vm_id, staged.path(), &options).await {
            Ok(job) => Ok(job),
            Err(e) => {
                warn!("Launch in VM {vm_id} failed, deleting it: {e}");
                if let Err(cleanup) = self.vm_action(&config, "delete", vm_id).await {
                    warn!("Failed to delete VM {vm_id}: {cleanup}");
                }
                Err(e)
            }
        }
    }

    /// Everything after allocation: boot, stage and start the script
    async fn launch(
        &self,
        config: &CloudConfig,
        vm_id: i64,
        staged: &Path,
        options: &SubmitOptions,
    ) -> BackendResult<SubmittedJob> {
        let address = self.wait_for_address(config, vm_id).await?;
        let target = Self::vm_target(config, &config.vm_user, &address);
        self.wait_for_ssh(config, &target).await?;

        let working_dir = options.working_dir.clone();
        if config.mounts_nfs() {
            let mount_point = shell_quote(&config.nfs_mount_point);
            let command = format!(
                "mkdir -p {mount_point} && sudo mount -t nfs {} {mount_point}",
                shell_quote(&format!("{}:{}", config.nfs_server, config.nfs_mount_point))
            );
            remote_exec(Arc::clone(&self.shell), target.clone(), command.clone(), None, false)
                .await?
                .into_stdout(&command)?;
            debug!("Mounted {} in VM {vm_id}", config.nfs_mount_point);
        }

        let remote_script = remote_script_path(working_dir.as_deref());
        remote_upload(
            Arc::clone(&self.shell),
            target.clone(),
            staged.to_path_buf(),
            remote_script.clone(),
            0o700,
        )
        .await?;

        let dir = working_dir.as_deref().unwrap_or(".");
        let output_path = options
            .output_path
            .clone()
            .unwrap_or_else(|| format!("{dir}/stdout"));
        let error_path = options
            .error_path
            .clone()
            .unwrap_or_else(|| format!("{dir}/stderr"));
        let command = format!(
            "{} > {} 2> {}",
            shell_quote(&remote_script),
            shell_quote(&output_path),
            shell_quote(&error_path)
        );

        let outcome = remote_exec(
            Arc::clone(&self.shell),
            target.clone(),
            command.clone(),
            working_dir,
            true,
        )
        .await?;
        let pid = outcome.pid().ok_or_else(|| BackendError::Internal {
            message: format!("Background launch of '{command}' returned no pid"),
        })?;

        let handle = VmJobHandle {
            pid,
            vm_user: config.vm_user.clone(),
            vm_address: address,
            vm_id: vm_id.to_string(),
        };
        info!("Job {handle} started on {}", self.machine_id);

        Ok(SubmittedJob {
            handle: handle.to_string(),
            vm_id: Some(handle.vm_id.clone()),
            name: options.name.clone().unwrap_or_else(|| format!("PID_{pid}")),
            output_path: Some(output_path),
            error_path: Some(error_path),
            status: JobStatus::Submitted,
        })
    }

    async fn wait_for_address(&self, config: &CloudConfig, vm_id: i64) -> BackendResult<String> {
        for attempt in 0..config.boot_attempts {
            let info = self.vm_info(config, vm_id).await?;
            if info.is_dead() {
                return Err(BackendError::Scheduler {
                    backend: "Cloud",
                    details: format!("VM {vm_id} stopped before it could run the job"),
                });
            }
            if let (true, Some(address)) = (info.is_running(), info.address) {
                debug!("VM {vm_id} running at {address} after {} probes", attempt + 1);
                return Ok(address);
            }
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
        }

        Err(BackendError::Timeout {
            what: format!("VM {vm_id} to boot"),
            attempts: config.boot_attempts,
        })
    }

    async fn wait_for_ssh(&self, config: &CloudConfig, target: &SshTarget) -> BackendResult<()> {
        for _ in 0..config.boot_attempts {
            let shell = Arc::clone(&self.shell);
            let probe = target.clone();
            if tokio::task::spawn_blocking(move || shell.is_ready_connection(&probe)).await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;
        }

        Err(BackendError::Timeout {
            what: format!("SSH on {}", target.host),
            attempts: config.boot_attempts,
        })
    }

    async fn probe_job(self, handle: String) -> BackendResult<JobStatus> {
        let job: VmJobHandle = handle.parse()?;
        let vm_id = parse_vm_id(&job.vm_id)?;
        let config = self.job_config()?;
        let target = Self::vm_target(&config, &job.vm_user, &job.vm_address);

        let command = format!("ps -o pid= -p {} | wc -l", job.pid);
        let stdout = remote_exec(Arc::clone(&self.shell), target, command.clone(), None, false)
            .await?
            .into_stdout(&command)?;
        let alive: u32 = stdout.trim().parse().map_err(|_| BackendError::Scheduler {
            backend: "Cloud",
            details: format!("Unexpected process probe output '{}'", stdout.trim()),
        })?;

        if alive > 0 {
            return Ok(JobStatus::Running);
        }
        self.vm_action(&config, "stop", vm_id).await?;
        Ok(JobStatus::Completed)
    }
}

/// VM id of a composite handle, or of a bare VM id
fn vm_id_of(handle: &str) -> BackendResult<i64> {
    if handle.contains('@') {
        let job: VmJobHandle = handle.parse()?;
        parse_vm_id(&job.vm_id)
    } else {
        parse_vm_id(handle)
    }
}

fn parse_vm_id(raw: &str) -> BackendResult<i64> {
    raw.parse()
        .map_err(|_| BackendError::InvalidParameter(format!("Bad VM id '{raw}'")))
}

impl JobBackend for CloudBackend {
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
            let vm_id = vm_id_of(&handle)?;
            let config = backend.job_config()?;
            backend.vm_action(&config, "delete", vm_id).await
        })
        .spawn()
    }

    fn job_state(&self, handle: &str) -> AsyncTask<BackendResult<JobStatus>> {
        let backend = self.clone();
        let handle = handle.to_string();
        AsyncTaskBuilder::new(async move { backend.probe_job(handle).await }).spawn()
    }

    fn job_start_time(&self, handle: &str) -> AsyncTask<BackendResult<Option<DateTime<Utc>>>> {
        let backend = self.clone();
        let handle = handle.to_string();
        AsyncTaskBuilder::new(async move {
            let vm_id = vm_id_of(&handle)?;
            let config = backend.job_config()?;
            let info = backend.vm_info(&config, vm_id).await?;
            Ok(info.start_time)
        })
        .spawn()
    }

    fn list_queues(&self, _filter: Option<&str>) -> AsyncTask<BackendResult<Vec<Queue>>> {
        AsyncTaskBuilder::new(async { Ok(Vec::new()) }).spawn()
    }

    /// The VM itself; once stopped, only files on a shared mount survive
    fn file_target(&self, handle: &str) -> BackendResult<SshTarget> {
        let job: VmJobHandle = handle.parse()?;
        let config = self.job_config()?;
        Ok(Self::vm_target(&config, &job.vm_user, &job.vm_address))
    }

    fn backend_type(&self) -> &'static str {
        "Cloud"
    }
}
