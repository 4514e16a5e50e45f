//! Container entry point: runs the job named by `JOB_ID`.

use std::process::ExitCode;
use tracing::{error, info};
use trinity_plugin::config::{ConfigError, PlatformAccess};
use trinity_plugin::job_waiter::WaitOptions;
use trinity_plugin::orchestrator::report_startup_failure;
use trinity_plugin::platform_http::HttpPlatform;
use trinity_plugin::{JobConfig, JobContext, JobOutcome, JobError, execute, logging};

/// Marks the job FAILED when the environment names it but is otherwise
/// unusable.
fn report_config_error(err: &ConfigError) {
    let access = match PlatformAccess::from_env() {
        Ok(access) => access,
        Err(e) => {
            error!("Could not report the configuration error: {e}");
            return;
        }
    };
    match HttpPlatform::new(&access.base_url, &access.api_key, WaitOptions::default()) {
        Ok(platform) => {
            report_startup_failure(&platform, &access.job_id, &JobError::from(err.clone()))
        }
        Err(e) => error!("Could not create the platform client: {e}"),
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init();

    let config = match JobConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            report_config_error(&e);
            return ExitCode::FAILURE;
        }
    };
    let (job_id, api_key) = match (config.require_job_id(), config.require_api_key()) {
        (Ok(job_id), Ok(api_key)) => (job_id.to_string(), api_key.to_string()),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let platform =
        match HttpPlatform::new(&config.base_url, &api_key, WaitOptions::from_config(&config)) {
            Ok(platform) => platform,
            Err(e) => {
                error!("Could not create the platform client: {e}");
                return ExitCode::FAILURE;
            }
        };

    let ctx = JobContext::new(&platform, &config, &job_id);
    match execute(&ctx) {
        Ok(JobOutcome::Completed { output }) => {
            info!(job_id, output_id = %output.id, "Job completed");
            ExitCode::SUCCESS
        }
        Ok(JobOutcome::Failed { error }) => {
            info!(job_id, "Job failed: {}", error.report_message());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(job_id, "{e}");
            ExitCode::FAILURE
        }
    }
}
