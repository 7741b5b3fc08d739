// ============================================================================
// File: packages/gridplane/src/backends/cloud/template.rs
// ----------------------------------------------------------------------------
// KVM virtual machine template sent with `one.vm.allocate`.
// ============================================================================

use super::CloudConfig;
use crate::backends::{BackendError, BackendResult, SubmitOptions};

const DEFAULT_CPU: i32 = 1;
const DEFAULT_MEMORY_MB: i32 = 512;

fn positive_or(value: i32, default: i32) -> i32 {
    if value <= 0 { default } else { value }
}

/// Render the template for one job VM
///
/// CPU and memory come from the submit options and fall back to one CPU and
/// 512 MB when unset. The image must be configured, either globally or
/// through the job's specific parameters.
pub fn kvm_template(options: &SubmitOptions, config: &CloudConfig) -> BackendResult<String> {
    if config.vm_image.is_empty() {
        return Err(BackendError::InvalidConfig {
            backend: "Cloud",
            details: "No virtual machine image configured".to_string(),
        });
    }

    let cpu = positive_or(options.nb_cpu, DEFAULT_CPU);
    let memory = positive_or(options.memory, DEFAULT_MEMORY_MB);
    let net = &config.virtual_net;

    Ok(format!(
        r#"NAME="gridplane-vm"
CPU={cpu}
VCPU={cpu}
MEMORY={memory}
DISK=[ IMAGE="{image}", DRIVER="qcow2" ]
OS=[ ARCH="i686", ROOT="sda1", BOOT="hd,fd,cdrom,network" ]
NIC=[ NETWORK="{net}" ]
GRAPHICS=[ TYPE="vnc", LISTEN="0.0.0.0", KEYMAP="fr" ]
RAW=[
  TYPE="kvm",
  DATA="<serial type='pty'><target port='0'/></serial><console type='pty'><target type='serial' port='0'/></console>" ]
CONTEXT=[
  HOSTNAME="vm-$VMID",
  NETWORK="YES",
  ETH0_IP="$NIC[IP, NETWORK=\"{net}\"]",
  ETH0_NETMASK="{mask}",
  ETH0_GATEWAY="{gateway}",
  ETH0_DNS="{dns}",
  FILES="{files}",
  TARGET="hdb" ]
"#,
        image = config.vm_image,
        mask = config.virtual_net_mask,
        gateway = config.virtual_net_gateway,
        dns = config.virtual_net_dns,
        files = config.context_init,
    ))
}
