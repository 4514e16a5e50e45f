//! Polling for asynchronous platform jobs.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::platform::{Job, Platform};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub interval: Duration,
    /// `None` waits for as long as the job takes.
    pub deadline: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::config::DEFAULT_POLL_INTERVAL_SECS),
            deadline: None,
        }
    }
}

impl WaitOptions {
    pub fn from_config(config: &JobConfig) -> Self {
        Self {
            interval: config.poll_interval,
            deadline: config.poll_deadline,
        }
    }
}

/// Blocks until `job_id` is COMPLETE or FAILED and returns that job.
pub fn await_completion(
    platform: &dyn Platform,
    job_id: &str,
    options: &WaitOptions,
) -> Result<Job, JobError> {
    await_completion_with(platform, job_id, options, None, std::thread::sleep)
}

/// Same as [`await_completion`] with an optional cancellation flag and a
/// caller-provided sleep.
pub fn await_completion_with<S>(
    platform: &dyn Platform,
    job_id: &str,
    options: &WaitOptions,
    cancel: Option<&AtomicBool>,
    mut sleep: S,
) -> Result<Job, JobError>
where
    S: FnMut(Duration),
{
    let started = Instant::now();
    let mut waited = Duration::ZERO;
    let mut polls = 0usize;
    loop {
        if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Err(JobError::unexpected(format!(
                "Stopped waiting for job {job_id}: cancelled"
            )));
        }

        let job = platform.get_job(job_id)?;
        polls += 1;
        if job.status.is_terminal() {
            info!(job_id, status = ?job.status, polls, "Job finished");
            return Ok(job);
        }
        debug!(job_id, status = ?job.status, progress = job.progress, "Job still running");

        if let Some(deadline) = options.deadline {
            // the injected sleep may not block, so count both clocks
            let elapsed = started.elapsed().max(waited);
            if elapsed + options.interval > deadline {
                return Err(JobError::unexpected(format!(
                    "Timed out after {}s waiting for job {job_id}",
                    deadline.as_secs()
                )));
            }
        }
        sleep(options.interval);
        waited += options.interval;
    }
}
