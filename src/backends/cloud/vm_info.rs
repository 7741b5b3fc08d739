// ============================================================================
// File: packages/gridplane/src/backends/cloud/vm_info.rs
// ----------------------------------------------------------------------------
// The few fields of the `one.vm.info` XML document the backend reads.
// ============================================================================

use chrono::{DateTime, Utc};

/// VM `STATE` value of an active machine
const STATE_ACTIVE: u32 = 3;
/// `LCM_STATE` value of a booted, running machine
const LCM_RUNNING: u32 = 3;
const STATE_DONE: u32 = 6;
const STATE_FAILED: u32 = 7;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmInfo {
    pub state: Option<u32>,
    pub lcm_state: Option<u32>,
    pub address: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

impl VmInfo {
    pub fn parse(xml: &str) -> Self {
        let number = |tag: &str| tag_text(xml, tag).and_then(|v| v.parse::<u32>().ok());
        Self {
            state: number("STATE"),
            lcm_state: number("LCM_STATE"),
            address: tag_text(xml, "IP").filter(|ip| !ip.is_empty()),
            start_time: tag_text(xml, "STIME")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|secs| *secs > 0)
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }

    /// Booted and reachable on the network
    pub fn is_running(&self) -> bool {
        self.state == Some(STATE_ACTIVE)
            && self.lcm_state == Some(LCM_RUNNING)
            && self.address.is_some()
    }

    /// Will never come up
    pub fn is_dead(&self) -> bool {
        matches!(self.state, Some(STATE_DONE) | Some(STATE_FAILED))
    }
}

/// Text of the first `<tag>` element, CDATA unwrapped
fn tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    let raw = xml[start..end].trim();
    let text = raw
        .strip_prefix("<![CDATA[")
        .and_then(|r| r.strip_suffix("]]>"))
        .unwrap_or(raw);
    Some(text.trim().to_string())
}
