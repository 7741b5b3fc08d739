// ============================================================================
// File: packages/gridplane/src/config.rs
// ----------------------------------------------------------------------------
// Server configuration: session defaults, identifier formats, machines and
// background task intervals. Loaded from a JSON file and/or the environment.
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backends::{MachineConfig, MachineRegistry};
use crate::ids::IdFormats;
use crate::session::{ClosePolicy, SessionDefaults};

pub const ENV_SESSION_TIMEOUT: &str = "GRID_SESSION_TIMEOUT";
pub const ENV_CLOSE_POLICY: &str = "GRID_CLOSE_POLICY";

/// Everything a control plane instance needs to start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub session: SessionDefaults,
    pub id_formats: IdFormats,

    /// Default `$SITE` value for minted identifiers
    pub site: String,
    pub machines: Vec<MachineConfig>,

    /// Seconds between two job monitor passes
    pub monitor_interval_secs: u64,
    /// Seconds between two session expiry sweeps
    pub sweep_interval_secs: u64,

    /// Where retrieved job output lands; the system temp dir when unset
    pub staging_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session: SessionDefaults::default(),
            id_formats: IdFormats::default(),
            site: String::new(),
            machines: Vec::new(),
            monitor_interval_secs: 30,
            sweep_interval_secs: 60,
            staging_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON configuration file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `GRID_SESSION_TIMEOUT` and `GRID_CLOSE_POLICY` from `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_SESSION_TIMEOUT) {
            self.session.timeout = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_SESSION_TIMEOUT} must be a number of seconds"))?;
        }
        if let Some(raw) = lookup(ENV_CLOSE_POLICY) {
            let policy: ClosePolicy = raw
                .parse()
                .with_context(|| format!("Invalid {ENV_CLOSE_POLICY}"))?;
            anyhow::ensure!(
                policy != ClosePolicy::Default,
                "{ENV_CLOSE_POLICY} must name a concrete policy"
            );
            self.session.close_policy = policy;
        }
        Ok(self)
    }

    pub fn with_session_defaults(mut self, session: SessionDefaults) -> Self {
        self.session = session;
        self
    }

    pub fn with_id_formats(mut self, formats: IdFormats) -> Self {
        self.id_formats = formats;
        self
    }

    pub fn with_site<S: Into<String>>(mut self, site: S) -> Self {
        self.site = site.into();
        self
    }

    pub fn with_machine(mut self, machine: MachineConfig) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn machine_registry(&self) -> MachineRegistry {
        MachineRegistry::from_machines(self.machines.iter().cloned())
    }
}
