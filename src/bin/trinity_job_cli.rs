use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use trinity_plugin::job_waiter::{self, WaitOptions};
use trinity_plugin::platform::{NewJob, PLUGIN_JOB, Platform};
use trinity_plugin::platform_http::HttpPlatform;
use trinity_plugin::{JobConfig, JobContext, JobOutcome, execute, logging, record_converter};

#[derive(Parser)]
#[command(
    name = "trinity_job_cli",
    version,
    about = "Manual harness for the Trinity plugin job"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the user the API key belongs to
    Whoami,
    /// Create a client-side plugin job record to run against
    CreateJob {
        /// Project that owns the job
        #[arg(long)]
        project: String,
        /// Input document id (pass twice for paired reads)
        #[arg(long = "input", required = true)]
        inputs: Vec<String>,
        #[arg(long, default_value = "Trinity (local)")]
        name: String,
    },
    /// Poll a job until it is COMPLETE or FAILED
    AwaitJob { job_id: String },
    /// Download a sequence document and list its records
    ListRecords { entity_id: String },
    /// Run the job named by JOB_ID in this process
    Run,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn connect(config: &JobConfig) -> Result<HttpPlatform> {
    let api_key = config.require_api_key()?;
    HttpPlatform::new(&config.base_url, api_key, WaitOptions::from_config(config))
        .context("Could not create the platform client")
}

fn list_records(platform: &dyn Platform, config: &JobConfig, entity_id: &str) -> Result<()> {
    std::fs::create_dir_all(&config.tabular_dir)?;
    let path = record_converter::tabular_path(config, entity_id);
    platform
        .download_tabular(entity_id, &path)
        .with_context(|| format!("Could not download document {entity_id}"))?;
    let records = record_converter::read_sequence_records(entity_id, &path)?;
    for record in &records {
        println!("{}: {}", record.id, record.name);
    }
    eprintln!("{} records", records.len());
    Ok(())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = JobConfig::from_env().context("Invalid configuration")?;
    let platform = connect(&config)?;

    match cli.command {
        Commands::Whoami => {
            let user = platform.get_current_user()?;
            print_json(&user)?;
        }
        Commands::CreateJob {
            project,
            inputs,
            name,
        } => {
            let job = platform.create_job(&NewJob {
                owner_id: project,
                name,
                job_type: PLUGIN_JOB.to_string(),
                input_entities: inputs,
                client_side: true,
                ..Default::default()
            })?;
            print_json(&job)?;
        }
        Commands::AwaitJob { job_id } => {
            let job = job_waiter::await_completion(
                &platform,
                &job_id,
                &WaitOptions::from_config(&config),
            )?;
            print_json(&job)?;
        }
        Commands::ListRecords { entity_id } => list_records(&platform, &config, &entity_id)?,
        Commands::Run => {
            let job_id = config.require_job_id()?;
            let ctx = JobContext::new(&platform, &config, job_id);
            match execute(&ctx)? {
                JobOutcome::Completed { output } => print_json(&output)?,
                JobOutcome::Failed { error } => eprintln!("{}", error.report_message()),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
