// ============================================================================
// File: packages/gridplane/src/plane.rs
// ----------------------------------------------------------------------------
// Assembles the services of one control plane instance from a ServerConfig.
// ============================================================================

use std::sync::Arc;

use log::info;

use crate::async_task::AsyncTask;
use crate::auth::{AuthSystemRegistry, CredentialVerifier};
use crate::backends::RpcTransport;
use crate::config::ServerConfig;
use crate::ids::IdentifierAllocator;
use crate::jobs::{JobCoordinator, JobMonitor};
use crate::remote::RemoteShell;
use crate::session::SessionAuthority;
use crate::store::Database;

/// The wired-up services sharing one storage handle
#[derive(Debug, Clone)]
pub struct ControlPlane {
    pub sessions: SessionAuthority,
    pub ids: Arc<IdentifierAllocator>,
    pub auth_systems: AuthSystemRegistry,
    pub jobs: JobCoordinator,
    config: ServerConfig,
}

impl ControlPlane {
    pub fn new(
        config: ServerConfig,
        db: Arc<dyn Database>,
        verifier: Arc<dyn CredentialVerifier>,
        shell: Arc<dyn RemoteShell>,
        rpc: Arc<dyn RpcTransport>,
    ) -> Self {
        let sessions = SessionAuthority::new(Arc::clone(&db), verifier, config.session);
        let ids = Arc::new(
            IdentifierAllocator::new(Arc::clone(&db), config.id_formats.clone())
                .with_site(config.site.clone()),
        );
        let auth_systems =
            AuthSystemRegistry::new(Arc::clone(&db), sessions.clone(), Arc::clone(&ids));
        let jobs = JobCoordinator::new(
            db,
            sessions.clone(),
            Arc::clone(&ids),
            Arc::new(config.machine_registry()),
            shell,
            rpc,
        )
        .with_staging_dir(config.staging_dir());

        Self {
            sessions,
            ids,
            auth_systems,
            jobs,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start the session expiry sweep and the job monitor
    ///
    /// Both run until their handles are aborted.
    pub fn spawn_background(&self) -> Vec<AsyncTask<()>> {
        info!(
            "Starting session sweep every {:?} and job monitor every {:?}",
            self.config.sweep_interval(),
            self.config.monitor_interval()
        );
        vec![
            self.sessions
                .spawn_expiry_sweep(self.config.sweep_interval()),
            JobMonitor::new(self.jobs.clone(), self.config.monitor_interval()).spawn(),
        ]
    }
}
