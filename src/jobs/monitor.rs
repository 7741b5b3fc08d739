// ============================================================================
// File: packages/gridplane/src/jobs/monitor.rs
// ----------------------------------------------------------------------------
// Background polling of unfinished jobs.
// ============================================================================

use std::time::Duration;

use log::{debug, error, warn};

use super::JobCoordinator;
use crate::async_task::{AsyncTask, AsyncTaskBuilder};
use crate::error::GridResult;

/// Polls every non-terminal job on a fixed interval
#[derive(Debug, Clone)]
pub struct JobMonitor {
    coordinator: JobCoordinator,
    interval: Duration,
}

impl JobMonitor {
    pub fn new(coordinator: JobCoordinator, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Poll each unfinished job once
    ///
    /// # Returns
    /// AsyncTask that resolves to the number of jobs that reached a terminal
    /// status during this pass
    pub fn poll_once(&self) -> AsyncTask<GridResult<usize>> {
        let coordinator = self.coordinator.clone();

        AsyncTaskBuilder::new(async move {
            let jobs = coordinator.db.unfinished_jobs()?;
            let mut finished = 0;
            for job in jobs {
                match coordinator.refresh_status(&job.job_id).await {
                    Ok(status) if status.is_terminal() => finished += 1,
                    Ok(_) => {}
                    Err(e) => warn!("Polling job {} failed: {}", job.job_id, e),
                }
            }
            debug!("Job monitor pass finished {finished} jobs");
            Ok(finished)
        })
        .spawn()
    }

    /// Run `poll_once` every interval until the task is aborted
    pub fn spawn(self) -> AsyncTask<()> {
        AsyncTaskBuilder::new(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.poll_once().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Job monitor pass failed: {}", e),
                    Err(e) => error!("Job monitor task failed: {}", e),
                }
            }
        })
        .spawn()
    }
}
