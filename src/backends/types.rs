// ============================================================================
// File: packages/gridplane/src/backends/types.rs
// ----------------------------------------------------------------------------
// Submission request, job status and queue types shared by every backend
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Queued,
    Waiting,
    Running,
    Completed,
    Cancelled,
    Failed,
    /// Output retrieved after completion
    Downloaded,
}

impl JobStatus {
    /// COMPLETED, CANCELLED, FAILED and DOWNLOADED are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Downloaded
        )
    }

    /// Whether a job in this status may move to `next`
    ///
    /// Non-terminal jobs may move anywhere. The only way out of a terminal
    /// status is COMPLETED to DOWNLOADED.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Completed => next == JobStatus::Downloaded,
            status if status.is_terminal() => false,
            _ => true,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Waiting => "WAITING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Failed => "FAILED",
            JobStatus::Downloaded => "DOWNLOADED",
        };
        f.write_str(name)
    }
}

/// Submission parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Job name given to the scheduler
    pub name: Option<String>,

    /// Target queue or partition
    pub queue: Option<String>,

    /// Remote directory the job runs from
    pub working_dir: Option<String>,

    /// Remote stdout path
    pub output_path: Option<String>,

    /// Remote stderr path
    pub error_path: Option<String>,

    /// Requested node count
    pub nb_nodes: Option<u32>,

    /// Requested CPUs; zero or negative means the backend default
    pub nb_cpu: i32,

    /// Requested memory in MB; zero or negative means the backend default
    pub memory: i32,

    /// Wall time limit in seconds
    pub wall_time: Option<u64>,

    /// Backend-specific `key=value` pairs separated by spaces
    pub specific_params: String,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_queue<Q: Into<String>>(mut self, queue: Q) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_working_dir<W: Into<String>>(mut self, dir: W) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_output_paths<O: Into<String>, E: Into<String>>(mut self, out: O, err: E) -> Self {
        self.output_path = Some(out.into());
        self.error_path = Some(err.into());
        self
    }

    pub fn with_nodes(mut self, nodes: u32) -> Self {
        self.nb_nodes = Some(nodes);
        self
    }

    pub fn with_cpu(mut self, cpus: i32) -> Self {
        self.nb_cpu = cpus;
        self
    }

    pub fn with_memory(mut self, megabytes: i32) -> Self {
        self.memory = megabytes;
        self
    }

    pub fn with_wall_time(mut self, seconds: u64) -> Self {
        self.wall_time = Some(seconds);
        self
    }

    pub fn with_specific_params<P: Into<String>>(mut self, params: P) -> Self {
        self.specific_params = params.into();
        self
    }
}

/// What a backend reports right after submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedJob {
    /// Backend handle: native batch id or composite cloud handle
    pub handle: String,
    /// Cloud instance backing the job
    pub vm_id: Option<String>,
    pub name: String,
    pub output_path: Option<String>,
    pub error_path: Option<String>,
    pub status: JobStatus,
}

/// Availability of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueState {
    Started,
    NotStarted,
    Unknown,
}

/// A scheduler queue or partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub state: QueueState,
    pub node_count: Option<u32>,
    pub max_wall_time: Option<String>,
    pub jobs_running: Option<u32>,
    pub jobs_queued: Option<u32>,
    pub is_default: bool,
}

impl Queue {
    pub fn named<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            state: QueueState::Unknown,
            node_count: None,
            max_wall_time: None,
            jobs_running: None,
            jobs_queued: None,
            is_default: false,
        }
    }
}
