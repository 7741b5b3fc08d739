// ============================================================================
// File: packages/gridplane/src/backends/batch/scheduler.rs
// ----------------------------------------------------------------------------
// Scheduler dialects: command lines for SLURM, PBS and SGE, and parsers for
// what those commands print.
// ============================================================================

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::backends::macros::JobMacros;
use crate::backends::{
    BackendError, BackendResult, BatchScheduler, JobStatus, Queue, QueueState, SubmitOptions,
};
use crate::remote::{CommandOutcome, shell_quote};

impl BatchScheduler {
    pub fn backend_name(&self) -> &'static str {
        match self {
            BatchScheduler::Slurm => "Slurm",
            BatchScheduler::Pbs => "PBS",
            BatchScheduler::Sge => "SGE",
        }
    }

    /// Scheduler variables standing in for the job macros
    pub fn macros(&self) -> JobMacros {
        match self {
            BatchScheduler::Slurm => JobMacros {
                job_id: "$SLURM_JOB_ID",
                job_name: "$SLURM_JOB_NAME",
                num_nodes: "$SLURM_JOB_NUM_NODES",
            },
            BatchScheduler::Pbs => JobMacros {
                job_id: "$PBS_JOBID",
                job_name: "$PBS_JOBNAME",
                num_nodes: "$(sort -u $PBS_NODEFILE | wc -l)",
            },
            BatchScheduler::Sge => JobMacros {
                job_id: "$JOB_ID",
                job_name: "$JOB_NAME",
                num_nodes: "$NHOSTS",
            },
        }
    }

    /// Submission command for an already uploaded script
    pub fn submit_command(&self, remote_script: &str, options: &SubmitOptions) -> String {
        let mut args: Vec<String> = Vec::new();
        match self {
            BatchScheduler::Slurm => {
                args.push("sbatch --parsable".to_string());
                if let Some(name) = &options.name {
                    args.push(format!("-J {}", shell_quote(name)));
                }
                if let Some(queue) = &options.queue {
                    args.push(format!("-p {}", shell_quote(queue)));
                }
                if let Some(nodes) = options.nb_nodes {
                    args.push(format!("-N {nodes}"));
                }
                if options.nb_cpu > 0 {
                    args.push(format!("-c {}", options.nb_cpu));
                }
                if options.memory > 0 {
                    args.push(format!("--mem={}M", options.memory));
                }
                if let Some(seconds) = options.wall_time {
                    args.push(format!("-t {}", format_hms(seconds)));
                }
                if let Some(out) = &options.output_path {
                    args.push(format!("-o {}", shell_quote(out)));
                }
                if let Some(err) = &options.error_path {
                    args.push(format!("-e {}", shell_quote(err)));
                }
            }
            BatchScheduler::Pbs => {
                args.push("qsub".to_string());
                if let Some(name) = &options.name {
                    args.push(format!("-N {}", shell_quote(name)));
                }
                if let Some(queue) = &options.queue {
                    args.push(format!("-q {}", shell_quote(queue)));
                }
                match (options.nb_nodes, options.nb_cpu) {
                    (Some(nodes), cpus) if cpus > 0 => {
                        args.push(format!("-l nodes={nodes}:ppn={cpus}"))
                    }
                    (Some(nodes), _) => args.push(format!("-l nodes={nodes}")),
                    (None, _) => {}
                }
                if options.memory > 0 {
                    args.push(format!("-l mem={}mb", options.memory));
                }
                if let Some(seconds) = options.wall_time {
                    args.push(format!("-l walltime={}", format_hms(seconds)));
                }
                if let Some(out) = &options.output_path {
                    args.push(format!("-o {}", shell_quote(out)));
                }
                if let Some(err) = &options.error_path {
                    args.push(format!("-e {}", shell_quote(err)));
                }
            }
            BatchScheduler::Sge => {
                args.push("qsub -terse -cwd".to_string());
                if let Some(name) = &options.name {
                    args.push(format!("-N {}", shell_quote(name)));
                }
                if let Some(queue) = &options.queue {
                    args.push(format!("-q {}", shell_quote(queue)));
                }
                if let Some(seconds) = options.wall_time {
                    args.push(format!("-l h_rt={}", format_hms(seconds)));
                }
                if options.memory > 0 {
                    args.push(format!("-l h_vmem={}M", options.memory));
                }
                if let Some(out) = &options.output_path {
                    args.push(format!("-o {}", shell_quote(out)));
                }
                if let Some(err) = &options.error_path {
                    args.push(format!("-e {}", shell_quote(err)));
                }
            }
        }
        args.push(shell_quote(remote_script));
        args.join(" ")
    }

    /// Native job id printed by the submission command
    pub fn parse_submit_output(&self, stdout: &str) -> BackendResult<String> {
        let line = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| self.error("Submission printed no job id".to_string()))?;

        let id = match self {
            // "1234" or "1234;cluster"
            BatchScheduler::Slurm => line.split(';').next().unwrap_or(line),
            // "1234.server"
            BatchScheduler::Pbs => line,
            // "1234" with -terse, "1234.1-10:1" for array jobs
            BatchScheduler::Sge => line.split('.').next().unwrap_or(line),
        };

        let numeric = id.split('.').next().unwrap_or(id);
        if numeric.is_empty() || !numeric.chars().all(|c| c.is_ascii_digit()) {
            return Err(self.error(format!("Unexpected submission output '{line}'")));
        }
        Ok(id.to_string())
    }

    /// Commands asked in turn for the job's status.
    ///
    /// The job reads as COMPLETED when none of them knows the id.
    pub fn status_commands(&self, job_id: &str) -> Vec<String> {
        let id = shell_quote(job_id);
        match self {
            BatchScheduler::Slurm => vec![
                format!("squeue -h -j {id} -o %T"),
                format!("sacct -n -X -P -j {id} -o State"),
            ],
            BatchScheduler::Pbs => vec![format!("qstat -f {id}")],
            BatchScheduler::Sge => vec!["qstat -u '*'".to_string()],
        }
    }

    /// Status reported by one status command; `None` when the id is unknown
    pub fn parse_status(
        &self,
        job_id: &str,
        outcome: &CommandOutcome,
    ) -> BackendResult<Option<JobStatus>> {
        let (exit_code, stdout, stderr) = match outcome {
            CommandOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => (*exit_code, stdout.as_str(), stderr.as_str()),
            CommandOutcome::Background { .. } => {
                return Err(self.error("Status command ran in background".to_string()));
            }
        };

        match self {
            BatchScheduler::Slurm => {
                if exit_code != 0 {
                    if stderr.contains("Invalid job id") {
                        return Ok(None);
                    }
                    return Err(self.error(format!("Status query failed: {}", stderr.trim())));
                }
                match stdout.split_whitespace().next() {
                    Some(code) => self.map_code(code).map(Some),
                    None => Ok(None),
                }
            }
            BatchScheduler::Pbs => {
                if exit_code != 0 {
                    if stderr.contains("Unknown Job Id") || stderr.contains("Job has finished") {
                        return Ok(None);
                    }
                    return Err(self.error(format!("Status query failed: {}", stderr.trim())));
                }
                let code = attribute(stdout, "job_state")
                    .ok_or_else(|| self.error(format!("No job_state for {job_id}")))?;
                self.map_code(&code).map(Some)
            }
            BatchScheduler::Sge => {
                if exit_code != 0 {
                    return Err(self.error(format!("Status query failed: {}", stderr.trim())));
                }
                match sge_job_row(stdout, job_id) {
                    Some(columns) => match columns.get(4) {
                        Some(code) => self.map_code(code).map(Some),
                        None => Err(self.error(format!("Truncated qstat row for {job_id}"))),
                    },
                    None => Ok(None),
                }
            }
        }
    }

    /// Map a native state code onto `JobStatus`
    pub fn map_code(&self, code: &str) -> BackendResult<JobStatus> {
        let status = match self {
            BatchScheduler::Slurm => match code {
                "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" => JobStatus::Queued,
                "CONFIGURING" => JobStatus::Submitted,
                "SUSPENDED" | "STOPPED" | "PREEMPTED" | "RESV_DEL_HOLD" | "SIGNALING" => {
                    JobStatus::Waiting
                }
                "RUNNING" | "COMPLETING" | "STAGE_OUT" | "RESIZING" => JobStatus::Running,
                "COMPLETED" => JobStatus::Completed,
                "CANCELLED" | "REVOKED" => JobStatus::Cancelled,
                "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" => {
                    JobStatus::Failed
                }
                other => return Err(self.error(format!("Unknown job state '{other}'"))),
            },
            BatchScheduler::Pbs => match code {
                "Q" => JobStatus::Queued,
                "H" | "W" | "S" | "T" | "U" => JobStatus::Waiting,
                "R" | "E" | "B" | "X" => JobStatus::Running,
                "C" | "F" => JobStatus::Completed,
                other => return Err(self.error(format!("Unknown job state '{other}'"))),
            },
            BatchScheduler::Sge => {
                if code.starts_with('E') {
                    JobStatus::Failed
                } else if code.starts_with('d') {
                    JobStatus::Cancelled
                } else if code.contains('h') || code.contains('s') || code.contains('S') || code.contains('T') {
                    JobStatus::Waiting
                } else if code.contains('r') || code.contains('t') || code.contains('R') {
                    JobStatus::Running
                } else if code.contains("qw") {
                    JobStatus::Queued
                } else {
                    return Err(self.error(format!("Unknown job state '{code}'")));
                }
            }
        };
        Ok(status)
    }

    pub fn cancel_command(&self, job_id: &str) -> String {
        match self {
            BatchScheduler::Slurm => format!("scancel {}", shell_quote(job_id)),
            BatchScheduler::Pbs | BatchScheduler::Sge => format!("qdel {}", shell_quote(job_id)),
        }
    }

    pub fn start_time_command(&self, job_id: &str) -> String {
        let id = shell_quote(job_id);
        match self {
            BatchScheduler::Slurm => format!("sacct -n -X -P -j {id} -o Start"),
            BatchScheduler::Pbs => format!("qstat -f {id}"),
            BatchScheduler::Sge => "qstat -u '*'".to_string(),
        }
    }

    /// Start time printed by `start_time_command`, if the job has started
    pub fn parse_start_time(&self, job_id: &str, stdout: &str) -> Option<DateTime<Utc>> {
        let naive = match self {
            BatchScheduler::Slurm => {
                let value = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
                NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").ok()?
            }
            BatchScheduler::Pbs => {
                let value = attribute(stdout, "start_time")?;
                let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
                NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y").ok()?
            }
            BatchScheduler::Sge => {
                let columns = sge_job_row(stdout, job_id)?;
                let state = columns.get(4)?;
                if !state.contains('r') {
                    return None;
                }
                let stamp = format!("{} {}", columns.get(5)?, columns.get(6)?);
                NaiveDateTime::parse_from_str(&stamp, "%m/%d/%Y %H:%M:%S").ok()?
            }
        };
        Some(naive.and_utc())
    }

    pub fn queues_command(&self) -> &'static str {
        match self {
            BatchScheduler::Slurm => "sinfo -h -o '%P|%a|%D|%l'",
            BatchScheduler::Pbs => "qstat -Q",
            BatchScheduler::Sge => "qconf -sql",
        }
    }

    pub fn parse_queues(&self, stdout: &str) -> Vec<Queue> {
        match self {
            BatchScheduler::Slurm => stdout
                .lines()
                .filter_map(|line| {
                    let mut fields = line.trim().split('|');
                    let raw_name = fields.next().filter(|n| !n.is_empty())?;
                    let availability = fields.next().unwrap_or("");
                    let nodes = fields.next().and_then(|n| n.parse().ok());
                    let limit = fields.next().map(str::to_string);

                    let mut queue = Queue::named(raw_name.trim_end_matches('*'));
                    queue.is_default = raw_name.ends_with('*');
                    queue.state = match availability {
                        "up" => QueueState::Started,
                        "down" | "drain" | "inact" => QueueState::NotStarted,
                        _ => QueueState::Unknown,
                    };
                    queue.node_count = nodes;
                    queue.max_wall_time = limit.filter(|l| l != "infinite");
                    Some(queue)
                })
                .collect(),
            BatchScheduler::Pbs => stdout
                .lines()
                .skip_while(|line| !line.trim_start().starts_with("---"))
                .skip(1)
                .filter_map(|line| {
                    let columns: Vec<&str> = line.split_whitespace().collect();
                    let mut queue = Queue::named(*columns.first()?);
                    queue.state = match columns.get(4).copied() {
                        Some("yes") => QueueState::Started,
                        Some("no") => QueueState::NotStarted,
                        _ => QueueState::Unknown,
                    };
                    queue.jobs_queued = columns.get(5).and_then(|v| v.parse().ok());
                    queue.jobs_running = columns.get(6).and_then(|v| v.parse().ok());
                    Some(queue)
                })
                .collect(),
            BatchScheduler::Sge => stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|name| {
                    let mut queue = Queue::named(name);
                    queue.state = QueueState::Started;
                    queue
                })
                .collect(),
        }
    }

    fn error(&self, details: String) -> BackendError {
        BackendError::Scheduler {
            backend: self.backend_name(),
            details,
        }
    }
}

/// `HH:MM:SS` for a number of seconds
pub(crate) fn format_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Value of `name = value` in `qstat -f` output
fn attribute(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == name).then(|| value.trim().to_string())
    })
}

/// Whitespace-split row of the job in a `qstat` listing
fn sge_job_row<'a>(output: &'a str, job_id: &str) -> Option<Vec<&'a str>> {
    output
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>())
        .find(|columns| columns.first() == Some(&job_id))
}
