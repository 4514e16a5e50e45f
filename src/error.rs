use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a job failure. Every kind except `Unexpected` carries a
/// message that can be shown to the end user as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InputValidation,
    MalformedRecord,
    ToolFailure,
    EmptyResult,
    Unexpected,
}

impl ErrorKind {
    pub fn is_user_facing(self) -> bool {
        !matches!(self, Self::Unexpected)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InputValidation => "input validation",
            Self::MalformedRecord => "malformed record",
            Self::ToolFailure => "tool failure",
            Self::EmptyResult => "empty result",
            Self::Unexpected => "unexpected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    pub user_message: Option<String>,
}

impl JobError {
    fn user_facing(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            user_message: Some(message.clone()),
            message,
        }
    }

    pub fn input_validation(message: impl Into<String>) -> Self {
        Self::user_facing(ErrorKind::InputValidation, message)
    }

    pub fn malformed_record(message: impl Into<String>) -> Self {
        Self::user_facing(ErrorKind::MalformedRecord, message)
    }

    pub fn tool_failure(message: impl Into<String>) -> Self {
        Self::user_facing(ErrorKind::ToolFailure, message)
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self::user_facing(ErrorKind::EmptyResult, message)
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Unexpected,
            message: message.into(),
            user_message: None,
        }
    }

    pub fn is_user_facing(&self) -> bool {
        self.kind.is_user_facing()
    }

    /// The tool and the record checks are deterministic per input, so none of
    /// the classified failures succeed on a plain retry.
    pub fn is_retryable(&self) -> bool {
        !self.is_user_facing()
    }

    /// Text recorded on the FAILED job.
    pub fn report_message(&self) -> String {
        match &self.user_message {
            Some(message) => message.clone(),
            None => format!("Unexpected error: {}", self.message),
        }
    }
}

impl From<PlatformError> for JobError {
    fn from(err: PlatformError) -> Self {
        JobError::unexpected(err.to_string())
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::unexpected(format!("I/O error: {err}"))
    }
}

impl From<ConfigError> for JobError {
    fn from(err: ConfigError) -> Self {
        JobError::unexpected(err.to_string())
    }
}

impl From<csv::Error> for JobError {
    fn from(err: csv::Error) -> Self {
        JobError::unexpected(format!("Could not parse tabular data: {err}"))
    }
}

/// Failures talking to the platform API.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform API error (status={status}): {body}")]
    Api { status: u16, body: String },

    #[error("could not decode platform response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
