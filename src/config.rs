//! Job configuration, resolved once from the process environment.
//!
//! Every variable the plugin understands is read here and nowhere else; the
//! resulting [`JobConfig`] is passed down to the pipeline stages. Blank values
//! are treated the same as unset ones.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const NUMBER_OF_CPUS_ENV: &str = "NUMBER_OF_CPUS";
pub const MAX_MEMORY_ENV: &str = "MAX_MEMORY";
pub const INPUT_ENTITIES_ENV: &str = "INPUT_ENTITIES";
pub const TARGET_FOLDER_ID_ENV: &str = "TARGET_FOLDER_ID";
pub const JOB_ID_ENV: &str = "JOB_ID";
pub const API_KEY_ENV: &str = "PIPE_API_KEY";
pub const BASE_URL_ENV: &str = "PIPE_BASE_URL";
pub const TRINITY_BIN_ENV: &str = "TRINITY_BIN";
pub const TRINITY_OUTPUT_PREFIX_ENV: &str = "TRINITY_OUTPUT_PREFIX";
pub const READS_DIR_ENV: &str = "READS_DIR";
pub const TABULAR_DIR_ENV: &str = "TABULAR_DIR";
pub const POLL_INTERVAL_ENV: &str = "ASYNC_POLL_INTERVAL_SECS";
pub const POLL_DEADLINE_ENV: &str = "ASYNC_POLL_DEADLINE_SECS";

pub const DEFAULT_MAX_MEMORY: &str = "40G";
pub const DEFAULT_BASE_URL: &str = "https://app.pipebio.com";
pub const DEFAULT_TRINITY_BIN: &str = "/root/trinityrnaseq-v2.15.1/Trinity";
pub const DEFAULT_OUTPUT_PREFIX: &str = "/tmp/trinity_output";
pub const DEFAULT_READS_DIR: &str = "/tmp";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub job_id: Option<String>,
    pub api_key: Option<String>,
    pub base_url: String,
    /// Explicit core count; when absent the runner detects physical cores.
    pub cpu_count: Option<usize>,
    pub max_memory: String,
    pub input_entity_ids: Vec<String>,
    pub target_folder_id: Option<String>,
    pub trinity_bin: PathBuf,
    pub output_prefix: PathBuf,
    pub reads_dir: PathBuf,
    pub tabular_dir: PathBuf,
    pub poll_interval: Duration,
    pub poll_deadline: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_id: None,
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            cpu_count: None,
            max_memory: DEFAULT_MAX_MEMORY.to_string(),
            input_entity_ids: vec![],
            target_folder_id: None,
            trinity_bin: PathBuf::from(DEFAULT_TRINITY_BIN),
            output_prefix: PathBuf::from(DEFAULT_OUTPUT_PREFIX),
            reads_dir: PathBuf::from(DEFAULT_READS_DIR),
            tabular_dir: PathBuf::from("."),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            poll_deadline: None,
        }
    }
}

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    let value = raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

/// Splits a comma separated id list, dropping blank entries.
pub fn parse_entity_ids(raw: &str) -> Vec<String> {
    raw.split(',').filter_map(normalized_non_empty).collect()
}

impl JobConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|v| normalized_non_empty(&v));
        let defaults = Self::default();

        let cpu_count = get(NUMBER_OF_CPUS_ENV)
            .map(|raw| parse_positive(NUMBER_OF_CPUS_ENV, &raw).map(|v| v as usize))
            .transpose()?;
        let poll_interval = get(POLL_INTERVAL_ENV)
            .map(|raw| parse_positive(POLL_INTERVAL_ENV, &raw).map(Duration::from_secs))
            .transpose()?
            .unwrap_or(defaults.poll_interval);
        let poll_deadline = get(POLL_DEADLINE_ENV)
            .map(|raw| parse_positive(POLL_DEADLINE_ENV, &raw).map(Duration::from_secs))
            .transpose()?;

        Ok(Self {
            job_id: get(JOB_ID_ENV),
            api_key: get(API_KEY_ENV),
            base_url: get(BASE_URL_ENV).unwrap_or(defaults.base_url),
            cpu_count,
            max_memory: get(MAX_MEMORY_ENV).unwrap_or(defaults.max_memory),
            input_entity_ids: get(INPUT_ENTITIES_ENV)
                .map(|raw| parse_entity_ids(&raw))
                .unwrap_or_default(),
            target_folder_id: get(TARGET_FOLDER_ID_ENV),
            trinity_bin: get(TRINITY_BIN_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.trinity_bin),
            output_prefix: get(TRINITY_OUTPUT_PREFIX_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_prefix),
            reads_dir: get(READS_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.reads_dir),
            tabular_dir: get(TABULAR_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.tabular_dir),
            poll_interval,
            poll_deadline,
        })
    }

    pub fn require_job_id(&self) -> Result<&str, ConfigError> {
        self.job_id.as_deref().ok_or(ConfigError::Missing(JOB_ID_ENV))
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::Missing(API_KEY_ENV))
    }
}

/// The minimum needed to reach the platform and report on the job. Resolves
/// even when the rest of the environment is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAccess {
    pub job_id: String,
    pub api_key: String,
    pub base_url: String,
}

impl PlatformAccess {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(|v| normalized_non_empty(&v));
        Ok(Self {
            job_id: get(JOB_ID_ENV).ok_or(ConfigError::Missing(JOB_ID_ENV))?,
            api_key: get(API_KEY_ENV).ok_or(ConfigError::Missing(API_KEY_ENV))?,
            base_url: get(BASE_URL_ENV).unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}
