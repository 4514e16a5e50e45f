//! Drives one plugin job from RUNNING to COMPLETE or FAILED.
//!
//! The pipeline is a single linear pass: resolve the two read documents,
//! materialize them as FASTQ, run Trinity and publish the assembly. Progress
//! is reported at fixed milestones. Any failure ends the job as FAILED with a
//! classified message; only unexpected failures are handed back to the caller
//! as errors.

use crate::config::JobConfig;
use crate::error::JobError;
use crate::platform::{
    Entity, EntityId, Job, JobStatus, JobStatusUpdate, PLUGIN_AUTHOR_PARAM, Platform,
};
use crate::{process_runner, record_converter, result_publisher};
use tracing::{error, info, warn};

pub const COMPLETED_MESSAGE: &str = "Trinity job completed";

/// Everything one invocation needs, passed explicitly down the pipeline.
pub struct JobContext<'a> {
    pub platform: &'a dyn Platform,
    pub config: &'a JobConfig,
    pub job_id: String,
}

impl<'a> JobContext<'a> {
    pub fn new(platform: &'a dyn Platform, config: &'a JobConfig, job_id: &str) -> Self {
        Self {
            platform,
            config,
            job_id: job_id.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed { output: Entity },
    /// A user-facing failure, already recorded on the job.
    Failed { error: JobError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Downloading,
    Downloaded,
    RunningTool,
    RanTool,
}

impl Milestone {
    pub fn progress(self) -> u8 {
        match self {
            Self::Downloading => 10,
            Self::Downloaded => 20,
            Self::RunningTool => 30,
            Self::RanTool => 70,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Downloading => "Downloading input documents",
            Self::Downloaded => "Downloaded input documents",
            Self::RunningTool => "Running trinity",
            Self::RanTool => "Ran trinity",
        }
    }
}

/// Sends RUNNING updates and never lets the reported progress go backwards.
struct ProgressReporter<'a> {
    platform: &'a dyn Platform,
    job_id: &'a str,
    last: u8,
}

impl<'a> ProgressReporter<'a> {
    fn new(platform: &'a dyn Platform, job_id: &'a str) -> Self {
        Self {
            platform,
            job_id,
            last: 0,
        }
    }

    fn milestone(&mut self, milestone: Milestone) -> Result<(), JobError> {
        let progress = milestone.progress().max(self.last);
        info!(progress, "{}", milestone.message());
        self.platform.update_job_status(
            self.job_id,
            &JobStatusUpdate {
                status: JobStatus::Running,
                progress,
                messages: vec![milestone.message().to_string()],
            },
        )?;
        self.last = progress;
        Ok(())
    }
}

/// Runs the job and records its terminal state.
pub fn execute(ctx: &JobContext) -> Result<JobOutcome, JobError> {
    log_session_user(ctx.platform);

    let mut job = None;
    match run_pipeline(ctx, &mut job) {
        Ok(output) => Ok(JobOutcome::Completed { output }),
        Err(err) => {
            report_failure(ctx.platform, &ctx.job_id, job.as_ref(), &err);
            if err.is_user_facing() {
                Ok(JobOutcome::Failed { error: err })
            } else {
                Err(err)
            }
        }
    }
}

fn log_session_user(platform: &dyn Platform) {
    match platform.get_current_user() {
        Ok(user) => info!("Using api key for {} {}", user.first_name, user.last_name),
        Err(e) => warn!("Could not look up the session user: {e}"),
    }
}

/// Input documents of the job; falls back to the configured list when the
/// job names none. Anything but exactly two ids is rejected.
pub fn resolve_inputs(job: &Job, config: &JobConfig) -> Result<[EntityId; 2], JobError> {
    let ids = if job.input_entities.is_empty() {
        &config.input_entity_ids
    } else {
        &job.input_entities
    };
    match ids.as_slice() {
        [forward, reverse] => Ok([forward.clone(), reverse.clone()]),
        other => Err(JobError::input_validation(format!(
            "Trinity job supports two inputs only, got {}.",
            other.len()
        ))),
    }
}

pub fn output_name(forward: &Entity, reverse: &Entity) -> String {
    format!("Trinity output ({} & {})", forward.name, reverse.name)
}

fn run_pipeline(ctx: &JobContext, job_slot: &mut Option<Job>) -> Result<Entity, JobError> {
    let platform = ctx.platform;
    let job = job_slot.insert(platform.get_job(&ctx.job_id)?);
    let [forward_id, reverse_id] = resolve_inputs(job, ctx.config)?;
    let mut progress = ProgressReporter::new(platform, &ctx.job_id);

    progress.milestone(Milestone::Downloading)?;
    let forward_reads = record_converter::materialize(platform, ctx.config, &forward_id)?;
    let reverse_reads = record_converter::materialize(platform, ctx.config, &reverse_id)?;
    progress.milestone(Milestone::Downloaded)?;

    let forward = platform.get_entity(&forward_id)?;
    let reverse = platform.get_entity(&reverse_id)?;
    let name = output_name(&forward, &reverse);

    progress.milestone(Milestone::RunningTool)?;
    let run = process_runner::run(ctx.config, &forward_reads.path, &reverse_reads.path)?;
    progress.milestone(Milestone::RanTool)?;

    let published = result_publisher::publish(
        platform,
        &run.result_path,
        &forward.owner_id,
        ctx.config.target_folder_id.as_deref(),
        &name,
    )?;

    platform.complete_job(
        &ctx.job_id,
        &[COMPLETED_MESSAGE.to_string()],
        std::slice::from_ref(&published.entity.id),
    )?;
    info!(output_id = %published.entity.id, rows = published.row_count, "{COMPLETED_MESSAGE}");
    Ok(published.entity)
}

/// Best-effort pointer to whoever published the plugin.
fn author_hint(platform: &dyn Platform, job: Option<&Job>) -> Option<String> {
    let author_id = job?.param_str(PLUGIN_AUTHOR_PARAM)?;
    match platform.get_user(&author_id) {
        Ok(author) => {
            let contact = match author.email.as_deref() {
                Some(email) if !email.is_empty() => format!("{} ({email})", author.display_name()),
                _ => author.display_name(),
            };
            Some(format!(
                "If the problem persists, please contact the plugin author {contact}."
            ))
        }
        Err(e) => {
            warn!(author_id, "Could not look up the plugin author: {e}");
            None
        }
    }
}

pub fn failure_message(platform: &dyn Platform, job: Option<&Job>, err: &JobError) -> String {
    let message = err.report_message();
    match author_hint(platform, job) {
        Some(hint) => format!("{message} {hint}"),
        None => message,
    }
}

/// Records a failure that happened before a [`JobContext`] could be built,
/// such as an invalid environment.
pub fn report_startup_failure(platform: &dyn Platform, job_id: &str, err: &JobError) {
    report_failure(platform, job_id, None, err);
}

fn report_failure(platform: &dyn Platform, job_id: &str, job: Option<&Job>, err: &JobError) {
    if err.is_user_facing() {
        warn!(kind = %err.kind, "Job failed: {}", err.message);
    } else {
        error!("Job failed unexpectedly: {}", err.message);
    }
    let update = JobStatusUpdate {
        status: JobStatus::Failed,
        progress: 100,
        messages: vec![failure_message(platform, job, err)],
    };
    if let Err(e) = platform.update_job_status(job_id, &update) {
        error!("Could not report the failure of job {job_id}: {e}");
    }
}
