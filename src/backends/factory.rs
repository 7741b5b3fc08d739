// ============================================================================
// File: packages/gridplane/src/backends/factory.rs
// ----------------------------------------------------------------------------
// Backend factory functions
// ============================================================================

use std::sync::Arc;

use crate::backends::cloud::RpcTransport;
use crate::backends::{BackendKind, BatchBackend, CloudBackend, JobBackend, MachineConfig};
use crate::remote::RemoteShell;

/// Shared services a backend is built on
#[derive(Debug, Clone)]
pub struct BackendDeps {
    pub shell: Arc<dyn RemoteShell>,
    pub rpc: Arc<dyn RpcTransport>,

    /// Caller's login on the machine, from their local account
    pub login: Option<String>,

    /// Specific parameters recorded with the job being acted on
    pub job_params: String,
}

impl BackendDeps {
    pub fn new(shell: Arc<dyn RemoteShell>, rpc: Arc<dyn RpcTransport>) -> Self {
        Self {
            shell,
            rpc,
            login: None,
            job_params: String::new(),
        }
    }

    pub fn with_login<L: Into<String>>(mut self, login: L) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn with_job_params<P: Into<String>>(mut self, params: P) -> Self {
        self.job_params = params.into();
        self
    }
}

/// Create the backend a machine's configuration selects
///
/// A pure function of its inputs: nothing is cached, so configuration
/// changes apply to the next call.
///
/// # Arguments
/// * `machine` - Snapshot of the machine configuration
/// * `deps` - Remote shell, RPC transport and caller login
///
/// # Returns
/// Shared backend instance
pub fn create_backend(machine: &MachineConfig, deps: &BackendDeps) -> Arc<dyn JobBackend> {
    match &machine.backend {
        BackendKind::Batch(config) => Arc::new(BatchBackend::new(
            machine.machine_id.clone(),
            config.clone(),
            deps.login.as_deref(),
            Arc::clone(&deps.shell),
        )),
        BackendKind::Cloud(config) => Arc::new(
            CloudBackend::new(
                machine.machine_id.clone(),
                config.clone(),
                Arc::clone(&deps.shell),
                Arc::clone(&deps.rpc),
            )
            .with_job_params(deps.job_params.clone()),
        ),
    }
}
