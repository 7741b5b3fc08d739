// ============================================================================
// File: packages/gridplane/src/backends/cloud/config.rs
// ----------------------------------------------------------------------------
// Cloud endpoint configuration, environment loading and per-job overrides.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::backends::{BackendError, BackendResult};

pub const ENV_ENDPOINT: &str = "GRID_CLOUD_ENDPOINT";
pub const ENV_USER: &str = "GRID_CLOUD_USER";
pub const ENV_USER_PASSWORD: &str = "GRID_CLOUD_USER_PASSWORD";
pub const ENV_CONTEXT_INIT: &str = "GRID_CLOUD_CONTEXT_INIT";
pub const ENV_VIRTUAL_NET: &str = "GRID_CLOUD_VIRTUAL_NET";
pub const ENV_VIRTUAL_NET_MASK: &str = "GRID_CLOUD_VIRTUAL_NET_MASK";
pub const ENV_VIRTUAL_NET_GATEWAY: &str = "GRID_CLOUD_VIRTUAL_NET_GATEWAY";
pub const ENV_VIRTUAL_NET_DNS: &str = "GRID_CLOUD_VIRTUAL_NET_DNS";
pub const ENV_DEFAULT_FLAVOR: &str = "GRID_CLOUD_DEFAULT_FLAVOR";
pub const ENV_VM_IMAGE: &str = "GRID_CLOUD_VM_IMAGE";
pub const ENV_VM_USER: &str = "GRID_CLOUD_VM_USER";
pub const ENV_VM_USER_KEY: &str = "GRID_CLOUD_VM_USER_KEY";
pub const ENV_NFS_SERVER: &str = "GRID_CLOUD_NFS_SERVER";
pub const ENV_NFS_MOUNT_POINT: &str = "GRID_CLOUD_NFS_MOUNT_POINT";

/// Cloud provider endpoint and virtual machine defaults
///
/// Empty strings mean "not configured". `vm_image` and `vm_user` may be left
/// empty here and supplied per job through user-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// RPC endpoint URL
    pub endpoint: String,
    pub user: String,
    pub user_password: String,

    /// Contextualization files handed to the VM
    pub context_init: String,

    /// Virtual network the NIC is attached to
    pub virtual_net: String,
    #[serde(default)]
    pub virtual_net_mask: String,
    #[serde(default)]
    pub virtual_net_gateway: String,
    #[serde(default)]
    pub virtual_net_dns: String,

    #[serde(default)]
    pub default_flavor: String,
    #[serde(default)]
    pub vm_image: String,
    #[serde(default)]
    pub vm_user: String,

    /// Private key for logging into the VM
    #[serde(default)]
    pub vm_user_key: String,

    #[serde(default)]
    pub nfs_server: String,
    #[serde(default)]
    pub nfs_mount_point: String,

    /// Address and SSH readiness probes made before giving up on a VM
    #[serde(default = "default_boot_attempts")]
    pub boot_attempts: u32,

    /// Delay between readiness probes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_boot_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl CloudConfig {
    pub fn new<E: Into<String>, U: Into<String>, P: Into<String>>(
        endpoint: E,
        user: U,
        user_password: P,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: user.into(),
            user_password: user_password.into(),
            context_init: String::new(),
            virtual_net: String::new(),
            virtual_net_mask: String::new(),
            virtual_net_gateway: String::new(),
            virtual_net_dns: String::new(),
            default_flavor: String::new(),
            vm_image: String::new(),
            vm_user: String::new(),
            vm_user_key: String::new(),
            nfs_server: String::new(),
            nfs_mount_point: String::new(),
            boot_attempts: default_boot_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    /// Load from the `GRID_CLOUD_*` environment variables
    pub fn from_env() -> BackendResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`, which maps a `GRID_CLOUD_*` key to its value
    pub fn from_lookup<F>(lookup: F) -> BackendResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| BackendError::InvalidConfig {
                backend: "Cloud",
                details: format!("{key} is not set"),
            })
        };
        let optional = |key: &str| lookup(key).unwrap_or_default();

        let mut config = Self::new(
            required(ENV_ENDPOINT)?,
            required(ENV_USER)?,
            required(ENV_USER_PASSWORD)?,
        );
        config.context_init = required(ENV_CONTEXT_INIT)?;
        config.virtual_net = required(ENV_VIRTUAL_NET)?;
        config.virtual_net_mask = optional(ENV_VIRTUAL_NET_MASK);
        config.virtual_net_gateway = optional(ENV_VIRTUAL_NET_GATEWAY);
        config.virtual_net_dns = optional(ENV_VIRTUAL_NET_DNS);
        config.default_flavor = optional(ENV_DEFAULT_FLAVOR);
        config.vm_image = optional(ENV_VM_IMAGE);
        config.vm_user = optional(ENV_VM_USER);
        config.vm_user_key = optional(ENV_VM_USER_KEY);
        config.nfs_server = optional(ENV_NFS_SERVER);
        config.nfs_mount_point = optional(ENV_NFS_MOUNT_POINT);
        Ok(config)
    }

    pub fn with_network<N: Into<String>>(mut self, virtual_net: N) -> Self {
        self.virtual_net = virtual_net.into();
        self
    }

    pub fn with_image<I: Into<String>>(mut self, vm_image: I) -> Self {
        self.vm_image = vm_image.into();
        self
    }

    pub fn with_vm_user<U: Into<String>>(mut self, vm_user: U) -> Self {
        self.vm_user = vm_user.into();
        self
    }

    pub fn with_nfs<S: Into<String>, M: Into<String>>(mut self, server: S, mount_point: M) -> Self {
        self.nfs_server = server.into();
        self.nfs_mount_point = mount_point.into();
        self
    }

    pub fn with_boot_probe(mut self, attempts: u32, interval_ms: u64) -> Self {
        self.boot_attempts = attempts;
        self.poll_interval_ms = interval_ms;
        self
    }

    /// Copy of this configuration with the job's specific parameters applied
    ///
    /// `params` holds space separated `key=value` pairs; words without `=`
    /// are ignored and an unknown key is rejected.
    pub fn with_user_params(&self, params: &str) -> BackendResult<Self> {
        let mut config = self.clone();
        for word in params.split(' ') {
            let Some((key, value)) = word.split_once('=') else {
                continue;
            };
            let value = value.to_string();
            match key {
                "endpoint" => config.endpoint = value,
                "user" => config.user = value,
                "user-password" => config.user_password = value,
                "vm-image" => config.vm_image = value,
                "vm-user" => config.vm_user = value,
                "vm-key" => config.vm_user_key = value,
                "vm-flavor" => config.default_flavor = value,
                "nfs-server" => config.nfs_server = value,
                "nfs-mountpoint" => config.nfs_mount_point = value,
                unknown => {
                    return Err(BackendError::InvalidParameter(format!(
                        "Unknown cloud parameter '{unknown}'"
                    )));
                }
            }
        }
        Ok(config)
    }

    /// `user:password` credential passed with every RPC call
    pub fn session_string(&self) -> BackendResult<String> {
        if self.user.is_empty() && self.user_password.is_empty() {
            return Err(BackendError::InvalidParameter(
                "Cloud user name and password are both empty".to_string(),
            ));
        }
        Ok(format!("{}:{}", self.user, self.user_password))
    }

    /// Whether an NFS share should be mounted in the VM before the job runs
    pub fn mounts_nfs(&self) -> bool {
        !self.nfs_server.is_empty() && !self.nfs_mount_point.is_empty()
    }
}
