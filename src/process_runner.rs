use crate::config::JobConfig;
use crate::error::JobError;
use std::ffi::OsString;
use std::fs;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

pub const RESULT_SUFFIX: &str = ".Trinity.fasta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBudget {
    pub cpu_count: usize,
    pub max_memory: String,
}

impl ResourceBudget {
    pub fn from_config(config: &JobConfig) -> Self {
        let cpu_count = resolve_cpu_count(config.cpu_count, detect_physical_cores);
        info!(cpu_count, max_memory = %config.max_memory, "Resolved resource budget");
        Self {
            cpu_count,
            max_memory: config.max_memory.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrinityRun {
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub output_lines: usize,
    pub result_path: PathBuf,
}

pub fn detect_physical_cores() -> Option<usize> {
    sysinfo::System::new().physical_core_count()
}

/// An explicit count wins over detection. Falls back to 1.
pub fn resolve_cpu_count<F>(explicit: Option<usize>, detect: F) -> usize
where
    F: FnOnce() -> Option<usize>,
{
    explicit
        .or_else(detect)
        .filter(|count| *count > 0)
        .unwrap_or(1)
}

pub fn result_path(output_prefix: &Path) -> PathBuf {
    let mut path: OsString = output_prefix.as_os_str().to_os_string();
    path.push(RESULT_SUFFIX);
    PathBuf::from(path)
}

pub fn build_arguments(
    forward: &Path,
    reverse: &Path,
    budget: &ResourceBudget,
    output_prefix: &Path,
) -> Vec<String> {
    vec![
        "--seqType".to_string(),
        "fq".to_string(),
        "--left".to_string(),
        forward.display().to_string(),
        "--right".to_string(),
        reverse.display().to_string(),
        "--CPU".to_string(),
        budget.cpu_count.to_string(),
        "--max_memory".to_string(),
        budget.max_memory.clone(),
        "--output".to_string(),
        output_prefix.display().to_string(),
    ]
}

/// Runs Trinity on a pair of read files and returns the location of the
/// assembled FASTA. Only the presence of that file counts as success.
pub fn run(config: &JobConfig, forward: &Path, reverse: &Path) -> Result<TrinityRun, JobError> {
    let budget = ResourceBudget::from_config(config);
    let executable = &config.trinity_bin;
    let args = build_arguments(forward, reverse, &budget, &config.output_prefix);
    let expected = result_path(&config.output_prefix);

    if expected.exists() {
        fs::remove_file(&expected)?;
    }

    let mut command_line = vec![executable.display().to_string()];
    command_line.extend(args.iter().cloned());
    info!("Running: {}", command_line.join(" "));

    // stdout and stderr share one pipe so the log keeps the tool's ordering
    let (reader, writer) = std::io::pipe()?;
    let mut child = {
        let mut cmd = Command::new(executable);
        cmd.args(&args)
            .stdout(writer.try_clone()?)
            .stderr(writer);
        cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                JobError::tool_failure(format!(
                    "Could not find the Trinity executable '{}'.",
                    executable.display()
                ))
            } else {
                JobError::unexpected(format!(
                    "Could not start '{}': {e}",
                    executable.display()
                ))
            }
        })?
    };

    let output_lines = match stream_output(reader) {
        Ok(count) => count,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e.into());
        }
    };

    let status = child.wait()?;
    let exit_code = status.code();
    if status.success() {
        info!(?exit_code, output_lines, "Trinity exited");
    } else {
        warn!(?exit_code, output_lines, "Trinity exited unsuccessfully");
    }

    if !expected.exists() {
        return Err(JobError::tool_failure("Trinity failed to create a result."));
    }
    info!(path = %expected.display(), "Created trinity output");

    Ok(TrinityRun {
        command: command_line,
        exit_code,
        output_lines,
        result_path: expected,
    })
}

/// Logs every line of the tool's merged output and returns the line count.
pub fn stream_output<R: Read>(output: R) -> io::Result<usize> {
    let mut output_lines = 0;
    let mut reader = BufReader::new(output);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        info!(target: "trinity", "{}", text.trim_end());
        output_lines += 1;
    }
    Ok(output_lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_explicit_cpu_count_wins_over_detection() {
        let detected = Cell::new(false);
        let count = resolve_cpu_count(Some(4), || {
            detected.set(true);
            Some(32)
        });
        assert_eq!(count, 4);
        assert!(!detected.get());
    }

    #[test]
    fn test_cpu_count_falls_back_to_detection() {
        assert_eq!(resolve_cpu_count(None, || Some(12)), 12);
        assert_eq!(resolve_cpu_count(None, || None), 1);
    }

    #[test]
    fn test_budget_detects_cores_without_override() {
        let config = JobConfig {
            cpu_count: None,
            ..Default::default()
        };
        let budget = ResourceBudget::from_config(&config);
        assert!(budget.cpu_count >= 1);
        assert_eq!(
            budget.cpu_count,
            detect_physical_cores().filter(|n| *n > 0).unwrap_or(1)
        );
        assert_eq!(budget.max_memory, "40G");
    }

    struct BrokenPipe;

    impl Read for BrokenPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
        }
    }

    #[test]
    fn test_stream_output_counts_lines() {
        let count = stream_output(&b"one\ntwo\nthree without newline"[..]).unwrap();
        assert_eq!(count, 3);
        assert_eq!(stream_output(&b""[..]).unwrap(), 0);
    }

    #[test]
    fn test_stream_output_propagates_read_errors() {
        let err = stream_output(BrokenPipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_budget_uses_config_override() {
        let config = JobConfig {
            cpu_count: Some(4),
            max_memory: "2G".to_string(),
            ..Default::default()
        };
        let budget = ResourceBudget::from_config(&config);
        assert_eq!(
            budget,
            ResourceBudget {
                cpu_count: 4,
                max_memory: "2G".to_string()
            }
        );
    }

    #[test]
    fn test_arguments_follow_trinity_cli() {
        let budget = ResourceBudget {
            cpu_count: 8,
            max_memory: "40G".to_string(),
        };
        let args = build_arguments(
            Path::new("/tmp/1.fq"),
            Path::new("/tmp/2.fq"),
            &budget,
            Path::new("/tmp/trinity_output"),
        );
        assert_eq!(
            args.join(" "),
            "--seqType fq --left /tmp/1.fq --right /tmp/2.fq --CPU 8 --max_memory 40G --output /tmp/trinity_output"
        );
        assert_eq!(
            result_path(Path::new("/tmp/trinity_output")),
            PathBuf::from("/tmp/trinity_output.Trinity.fasta")
        );
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use crate::error::ErrorKind as JobErrorKind;
        use crate::test_support::write_script;
        use tempfile::tempdir;

        const ASSEMBLE: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
echo "assembling into $out"
echo "a warning" >&2
printf '>TRINITY_DN0_c0_g1_i1 len=4\nACGT\n' > "$out.Trinity.fasta"
"#;

        fn config_for(dir: &Path, script: PathBuf) -> JobConfig {
            JobConfig {
                trinity_bin: script,
                output_prefix: dir.join("trinity_output"),
                cpu_count: Some(2),
                ..Default::default()
            }
        }

        #[test]
        fn test_successful_run_returns_result_path() {
            let td = tempdir().unwrap();
            let script = write_script(td.path(), "trinity.sh", ASSEMBLE);
            let config = config_for(td.path(), script);

            let run = run(&config, Path::new("a.fq"), Path::new("b.fq")).unwrap();
            assert_eq!(run.result_path, td.path().join("trinity_output.Trinity.fasta"));
            assert!(run.result_path.exists());
            assert_eq!(run.exit_code, Some(0));
            assert_eq!(run.output_lines, 2);
            assert!(run.command.contains(&"--CPU".to_string()));
            assert!(run.command.contains(&"2".to_string()));
        }

        #[test]
        fn test_nonzero_exit_without_result_is_tool_failure() {
            let td = tempdir().unwrap();
            let script = write_script(td.path(), "fail.sh", "echo 'out of memory' >&2\nexit 3\n");
            let config = config_for(td.path(), script);

            let err = run(&config, Path::new("a.fq"), Path::new("b.fq")).unwrap_err();
            assert_eq!(err.kind, JobErrorKind::ToolFailure);
            assert!(!err.is_retryable());
            assert_eq!(err.report_message(), "Trinity failed to create a result.");
        }

        #[test]
        fn test_clean_exit_without_result_is_tool_failure() {
            let td = tempdir().unwrap();
            let script = write_script(td.path(), "noop.sh", "exit 0\n");
            let config = config_for(td.path(), script);
            let stale = result_path(&config.output_prefix);
            fs::write(&stale, ">old\nAAAA\n").unwrap();

            let err = run(&config, Path::new("a.fq"), Path::new("b.fq")).unwrap_err();
            assert_eq!(err.kind, JobErrorKind::ToolFailure);
            assert!(!stale.exists());
        }

        #[test]
        fn test_missing_executable_is_tool_failure() {
            let td = tempdir().unwrap();
            let config = config_for(td.path(), td.path().join("no-such-trinity"));

            let err = run(&config, Path::new("a.fq"), Path::new("b.fq")).unwrap_err();
            assert_eq!(err.kind, JobErrorKind::ToolFailure);
            assert!(err.report_message().contains("no-such-trinity"));
        }
    }
}
