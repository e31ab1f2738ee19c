//! Execution harness
//!
//! Runs one shell command against untrusted code and returns an
//! [`ExecutionRecord`]. The command runs under `/bin/bash -o pipefail -c` in
//! its own session with a CPU rlimit, a wall-clock watchdog, stdin from
//! `/dev/null` and a bounded output capture. When the primary process exits,
//! or the caller drops the run before it finishes, whatever is left of its
//! process group is killed.
//!
//! The harness does NOT:
//! - Compare outputs or decide outcomes
//! - Know which test kind it is running

pub mod capture;
pub mod status;
pub mod template;

use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use lazy_regex::regex_is_match;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{dup2, pipe2, setsid, Pid};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::net::unix::pipe;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GraderConfig;
use capture::Captured;
use status::{normalize_shell_code, SIGPIPE_SHELL_CODE, TIMED_OUT_CODE};
use template::CORE_CMD;

/// Descriptor the wrapper function writes the program's status to
const STATUS_FD: i32 = 3;

/// Most bytes kept from the shell's own error channel
const ERROR_CHANNEL_CAP: usize = 64 * 1024;

/// How long to wait for pipes to close once the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to prepare execution: {0}")]
    Setup(#[source] std::io::Error),

    #[error("failed to launch shell for `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed reading command output: {0}")]
    Capture(String),

    #[error("output stayed open after the process group was killed")]
    OutputStalled,

    #[error("shell rejected command (status {code}): {message}")]
    Shell { code: i32, message: String },
}

/// How much output a run may produce before it is truncated
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputLimit {
    /// Reference solution run
    Solution,
    /// Submission run, sized from the solution's output length when known
    Submission { expected_len: Option<usize> },
}

impl OutputLimit {
    pub fn cap(&self, config: &GraderConfig) -> usize {
        match self {
            OutputLimit::Solution => config.solution_output_cap,
            OutputLimit::Submission {
                expected_len: Some(len),
            } => config.min_output_cap.max(len.saturating_mul(2)),
            OutputLimit::Submission { expected_len: None } => config.min_output_cap,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub work_dir: PathBuf,
    /// Fully expanded shell command
    pub command: String,
    /// Wall-clock and soft CPU limit; the configured default when unset
    pub timeout_secs: Option<u64>,
    pub env: Vec<(String, String)>,
    /// Provide a fresh `$logpath` file and read it back afterwards
    pub aux_log: bool,
    pub output_limit: OutputLimit,
}

impl ExecutionSpec {
    pub fn new(work_dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            command: command.into(),
            timeout_secs: None,
            env: Vec::new(),
            aux_log: false,
            output_limit: OutputLimit::Submission { expected_len: None },
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_aux_log(mut self) -> Self {
        self.aux_log = true;
        self
    }

    pub fn with_output_limit(mut self, limit: OutputLimit) -> Self {
        self.output_limit = limit;
        self
    }

    /// Whether the command wraps its program under test with `core_cmd`
    pub fn is_wrapped(&self) -> bool {
        regex_is_match!(r"\bcore_cmd\b", &self.command)
    }
}

/// What happened when a command ran. Never mutated after it is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Combined stdout and stderr of the program
    pub output: String,
    /// 0 clean, `-N` for signal N, positive for the program's own exit,
    /// [`TIMED_OUT_CODE`] when killed by the watchdog
    pub exit_code: i32,
    pub elapsed_secs: f64,
    /// Contents of `$logpath`, `None` when the tool wrote nothing
    pub aux_log: Option<String>,
    /// Output hit the cap and ends with the truncation marker
    pub truncated: bool,
}

impl ExecutionRecord {
    pub fn timed_out(&self) -> bool {
        self.exit_code == TIMED_OUT_CODE
    }

    /// Signal number that terminated the program, if any
    pub fn signal(&self) -> Option<i32> {
        (self.exit_code < 0).then_some(-self.exit_code)
    }

    /// Copy of this record with its output replaced (post-filtering)
    pub fn with_output(&self, output: String) -> Self {
        Self {
            output,
            ..self.clone()
        }
    }
}

/// Run a command and capture what it did
pub async fn execute(
    spec: &ExecutionSpec,
    config: &GraderConfig,
) -> Result<ExecutionRecord, ExecutionError> {
    let timeout_secs = spec
        .timeout_secs
        .unwrap_or(config.default_timeout_secs)
        .max(1);
    let cpu_hard = config.cpu_hard_limit(timeout_secs);
    let output_cap = spec.output_limit.cap(config);

    let log_file = if spec.aux_log {
        Some(NamedTempFile::new().map_err(ExecutionError::Setup)?)
    } else {
        None
    };
    let command = match &log_file {
        Some(file) => {
            let vars = HashMap::from([(
                "logpath".to_string(),
                file.path().display().to_string(),
            )]);
            template::expand_vars(&spec.command, &vars)
        }
        None => spec.command.clone(),
    };

    let wrapped = spec.is_wrapped();
    let script = build_script(&command, wrapped);

    let status_pipe = if wrapped {
        Some(pipe2(OFlag::O_CLOEXEC).map_err(|e| ExecutionError::Setup(e.into()))?)
    } else {
        None
    };
    let status_tx_raw = status_pipe.as_ref().map(|(_, tx)| tx.as_raw_fd());

    debug!("Executing in {:?}: {}", spec.work_dir, command);

    let mut cmd = Command::new("/bin/bash");
    cmd.args(["-o", "pipefail", "-c", &script])
        .current_dir(&spec.work_dir)
        .env("SHELL", "/bin/bash")
        .env("LC_ALL", "C")
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // SAFETY: the closure only makes async-signal-safe system calls.
    unsafe {
        cmd.pre_exec(move || {
            setsid()?;
            setrlimit(Resource::RLIMIT_CPU, timeout_secs, cpu_hard)?;
            if let Some(fd) = status_tx_raw {
                if fd == STATUS_FD {
                    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
                } else {
                    dup2(fd, STATUS_FD)?;
                }
            }
            Ok(())
        });
    }

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
        command: command.clone(),
        source,
    })?;

    // The child holds its own copy of the write end now
    let status_rx = status_pipe.map(|(rx, tx)| {
        drop(tx);
        rx
    });

    let group = GroupGuard(child.id().map(|pid| Pid::from_raw(pid as i32)));

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ExecutionError::Capture("stdout not piped".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ExecutionError::Capture("stderr not piped".to_string()))?;

    let out_task = tokio::spawn(capture::read_capped(stdout, output_cap));
    let err_task = tokio::spawn(capture::read_capped(stderr, ERROR_CHANNEL_CAP));
    let status_task = match status_rx {
        Some(fd) => Some(spawn_status_reader(fd)?),
        None => None,
    };

    let (exit_status, timed_out) =
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await {
            Ok(result) => (result.map_err(ExecutionError::Wait)?, false),
            Err(_) => {
                warn!(
                    "Command timed out after {}s, killing process group",
                    timeout_secs
                );
                group.kill();
                (child.wait().await.map_err(ExecutionError::Wait)?, true)
            }
        };
    let elapsed_secs = started.elapsed().as_secs_f64();

    // Reap anything the program left behind
    group.finish();

    let output = drain(out_task).await?;
    let errors = drain(err_task).await?;
    let status_text = match status_task {
        Some(task) => Some(drain(task).await?),
        None => None,
    };

    let shell_code = shell_exit_code(&exit_status);
    let error_text = capture::finish_output(&errors).trim().to_string();
    if !error_text.is_empty()
        || (wrapped && shell_code >= 126 && shell_code != SIGPIPE_SHELL_CODE && !timed_out)
    {
        return Err(ExecutionError::Shell {
            code: shell_code,
            message: error_text,
        });
    }

    let program_code = match status_text {
        Some(captured) => {
            let text = String::from_utf8_lossy(&captured.bytes).into_owned();
            match text.lines().last().and_then(|l| l.trim().parse::<i32>().ok()) {
                Some(code) => code,
                None => {
                    if !timed_out {
                        warn!("Wrapped program reported no status, using shell status {}", shell_code);
                    }
                    shell_code
                }
            }
        }
        None => shell_code,
    };

    let exit_code = if timed_out {
        TIMED_OUT_CODE
    } else {
        normalize_shell_code(program_code)
    };

    let aux_log = match &log_file {
        Some(file) => read_aux_log(file).await,
        None => None,
    };

    debug!(
        "Command finished: exit {} in {:.3}s ({} bytes captured{})",
        exit_code,
        elapsed_secs,
        output.bytes.len(),
        if output.truncated { ", truncated" } else { "" }
    );

    Ok(ExecutionRecord {
        output: capture::finish_output(&output),
        exit_code,
        elapsed_secs,
        aux_log,
        truncated: output.truncated,
    })
}

fn build_script(command: &str, wrapped: bool) -> String {
    if wrapped {
        format!(
            "{f}() {{ {{ \"$@\" 2>&1 ; }} 2>/dev/null ; echo $? >&{fd} ; return 0; }}; {{ {cmd} ; }}",
            f = CORE_CMD,
            fd = STATUS_FD,
            cmd = command
        )
    } else {
        format!("{{ {} ; }} 2>&1", command)
    }
}

fn spawn_status_reader(
    fd: OwnedFd,
) -> Result<JoinHandle<std::io::Result<Captured>>, ExecutionError> {
    let receiver = pipe::Receiver::from_owned_fd(fd).map_err(ExecutionError::Setup)?;
    Ok(tokio::spawn(capture::read_capped(receiver, 256)))
}

async fn drain(
    task: JoinHandle<std::io::Result<Captured>>,
) -> Result<Captured, ExecutionError> {
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(Ok(captured))) => Ok(captured),
        Ok(Ok(Err(e))) => Err(ExecutionError::Capture(e.to_string())),
        Ok(Err(e)) => Err(ExecutionError::Capture(e.to_string())),
        Err(_) => Err(ExecutionError::OutputStalled),
    }
}

/// Kills the session's process group when dropped, so a cancelled or failed
/// run leaves nothing behind
struct GroupGuard(Option<Pid>);

impl GroupGuard {
    fn kill(&self) {
        kill_group(self.0);
    }

    fn finish(mut self) {
        kill_group(self.0.take());
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0.take() {
            debug!("Run abandoned, killing process group {}", pgid);
            kill_group(Some(pgid));
        }
    }
}

fn kill_group(group: Option<Pid>) {
    let Some(pgid) = group else {
        return;
    };
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

fn shell_exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(Signal::SIGKILL as i32),
    }
}

async fn read_aux_log(file: &NamedTempFile) -> Option<String> {
    match tokio::fs::read(file.path()).await {
        Ok(bytes) if !bytes.is_empty() => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(_) => {
            warn!("Auxiliary log {:?} is empty", file.path());
            None
        }
        Err(e) => {
            warn!("Failed to read auxiliary log {:?}: {}", file.path(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_limit_caps() {
        let config = GraderConfig::default();
        assert_eq!(
            OutputLimit::Submission { expected_len: None }.cap(&config),
            100_000
        );
        assert_eq!(
            OutputLimit::Submission {
                expected_len: Some(10)
            }
            .cap(&config),
            100_000
        );
        assert_eq!(
            OutputLimit::Submission {
                expected_len: Some(80_000)
            }
            .cap(&config),
            160_000
        );
        assert_eq!(OutputLimit::Solution.cap(&config), config.solution_output_cap);
    }

    #[test]
    fn test_spec_builder_and_wrapping() {
        let spec = ExecutionSpec::new("/tmp", "core_cmd ./reverse")
            .with_timeout(3)
            .with_env("NAME", "value")
            .with_aux_log();
        assert_eq!(spec.timeout_secs, Some(3));
        assert!(spec.aux_log);
        assert!(spec.is_wrapped());
        assert!(!ExecutionSpec::new("/tmp", "./my_core_cmd_test").is_wrapped());
    }

    #[test]
    fn test_build_script() {
        let plain = build_script("make", false);
        assert_eq!(plain, "{ make ; } 2>&1");
        let wrapped = build_script("core_cmd ./a", true);
        assert!(wrapped.starts_with("core_cmd() {"));
        assert!(wrapped.contains("echo $? >&3"));
        assert!(wrapped.ends_with("{ core_cmd ./a ; }"));
    }

    #[test]
    fn test_record_helpers() {
        let record = ExecutionRecord {
            output: "x".to_string(),
            exit_code: -11,
            elapsed_secs: 0.1,
            aux_log: None,
            truncated: false,
        };
        assert_eq!(record.signal(), Some(11));
        assert!(!record.timed_out());
        let filtered = record.with_output("y".to_string());
        assert_eq!(filtered.output, "y");
        assert_eq!(record.output, "x");
    }
}
