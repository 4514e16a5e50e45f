pub mod config;
pub mod error;
pub mod job_waiter;
pub mod logging;
pub mod orchestrator;
pub mod platform;
pub mod platform_http;
pub mod process_runner;
pub mod record_converter;
pub mod result_publisher;

#[cfg(test)]
mod test_support;

pub use config::JobConfig;
pub use error::{ErrorKind, JobError, PlatformError};
pub use orchestrator::{JobContext, JobOutcome, execute};
pub use platform::Platform;
