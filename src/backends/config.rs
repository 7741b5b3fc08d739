// ============================================================================
// File: packages/gridplane/src/backends/config.rs
// ----------------------------------------------------------------------------
// Machine configuration: which backend a machine resolves to, and the
// process-wide registry holding those configurations.
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::cloud::CloudConfig;
use crate::error::{GridError, GridResult};

/// Batch schedulers the batch backend can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchScheduler {
    Slurm,
    Pbs,
    Sge,
}

impl fmt::Display for BatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchScheduler::Slurm => "SLURM",
            BatchScheduler::Pbs => "PBS",
            BatchScheduler::Sge => "SGE",
        };
        f.write_str(name)
    }
}

/// SSH-reachable cluster front-end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Front-end host name
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Scheduler installed on the cluster
    pub scheduler: BatchScheduler,

    /// Scheduler version, informational
    #[serde(default)]
    pub version: String,

    /// Login used when the job owner has no local account
    pub default_user: String,

    /// Private key for the front-end; SSH agent otherwise
    #[serde(default)]
    pub identity: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

impl BatchConfig {
    pub fn new<H: Into<String>, U: Into<String>>(
        host: H,
        scheduler: BatchScheduler,
        default_user: U,
    ) -> Self {
        Self {
            host: host.into(),
            port: default_ssh_port(),
            scheduler,
            version: String::new(),
            default_user: default_user.into(),
            identity: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_version<V: Into<String>>(mut self, version: V) -> Self {
        self.version = version.into();
        self
    }
}

/// Backend variant a machine resolves to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendKind {
    Batch(BatchConfig),
    Cloud(CloudConfig),
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Batch(_) => "Batch",
            BackendKind::Cloud(_) => "Cloud",
        }
    }
}

/// A machine jobs can be submitted to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub machine_id: String,
    pub name: String,
    #[serde(default)]
    pub site: String,
    pub backend: BackendKind,
}

impl MachineConfig {
    pub fn new<I: Into<String>>(machine_id: I, backend: BackendKind) -> Self {
        let machine_id = machine_id.into();
        Self {
            name: machine_id.clone(),
            machine_id,
            site: String::new(),
            backend,
        }
    }

    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_site<S: Into<String>>(mut self, site: S) -> Self {
        self.site = site.into();
        self
    }
}

/// Process-wide machine configurations
///
/// Updates are visible to the next operation; backends are built from a
/// snapshot and never cached.
#[derive(Debug, Default)]
pub struct MachineRegistry {
    machines: RwLock<HashMap<String, MachineConfig>>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_machines<I: IntoIterator<Item = MachineConfig>>(machines: I) -> Self {
        let machines = machines
            .into_iter()
            .map(|m| (m.machine_id.clone(), m))
            .collect();
        Self {
            machines: RwLock::new(machines),
        }
    }

    /// Snapshot of one machine's configuration
    pub fn get(&self, machine_id: &str) -> GridResult<MachineConfig> {
        let machines = self
            .machines
            .read()
            .map_err(|e| GridError::system(format!("Failed to acquire read lock: {e}")))?;
        machines
            .get(machine_id)
            .cloned()
            .ok_or_else(|| GridError::UnknownMachine(machine_id.to_string()))
    }

    /// Insert or replace a machine
    pub fn upsert(&self, machine: MachineConfig) -> GridResult<()> {
        let mut machines = self
            .machines
            .write()
            .map_err(|e| GridError::system(format!("Failed to acquire write lock: {e}")))?;
        machines.insert(machine.machine_id.clone(), machine);
        Ok(())
    }

    pub fn remove(&self, machine_id: &str) -> GridResult<Option<MachineConfig>> {
        let mut machines = self
            .machines
            .write()
            .map_err(|e| GridError::system(format!("Failed to acquire write lock: {e}")))?;
        Ok(machines.remove(machine_id))
    }

    pub fn machine_ids(&self) -> GridResult<Vec<String>> {
        let machines = self
            .machines
            .read()
            .map_err(|e| GridError::system(format!("Failed to acquire read lock: {e}")))?;
        let mut ids: Vec<String> = machines.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
