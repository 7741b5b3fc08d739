// ============================================================================
// File: packages/gridplane/src/backends/cloud/handle.rs
// ----------------------------------------------------------------------------
// Composite handle of a job running inside a cloud VM.
// ============================================================================

use std::fmt;
use std::str::FromStr;

use crate::backends::BackendError;

/// `pid@vmUser@vmAddress@vmId`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmJobHandle {
    pub pid: u32,
    pub vm_user: String,
    pub vm_address: String,
    pub vm_id: String,
}

impl fmt::Display for VmJobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}@{}@{}",
            self.pid, self.vm_user, self.vm_address, self.vm_id
        )
    }
}

impl FromStr for VmJobHandle {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            BackendError::InvalidParameter(format!(
                "Bad job handle '{s}': expected pid@vmUser@vmAddress@vmId"
            ))
        };

        let fields: Vec<&str> = s.split('@').collect();
        let [pid, vm_user, vm_address, vm_id] = fields.as_slice() else {
            return Err(invalid());
        };
        if [vm_user, vm_address, vm_id].iter().any(|f| f.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            pid: pid.parse().map_err(|_| invalid())?,
            vm_user: vm_user.to_string(),
            vm_address: vm_address.to_string(),
            vm_id: vm_id.to_string(),
        })
    }
}
