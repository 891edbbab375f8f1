//! Bounded host command execution.
//!
//! Every command runs in its own process group with piped, separately
//! captured stdout/stderr. A deadline or a dropped future kills the whole
//! group, and so does a normal exit of the leader: nothing the command
//! backgrounded survives `run`. Non-zero exit is data, not an error.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hostgate_core::config::CommandConfig;
use hostgate_core::GatewayError;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// How long to keep draining pipes after the process is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// What to run. Only `Shell` goes through `/bin/sh -c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Argv {
        program: String,
        args: Vec<String>,
        stdin: Option<String>,
    },
    Shell {
        script: String,
    },
}

impl CommandSpec {
    pub fn argv<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::Argv {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn shell(script: impl Into<String>) -> Self {
        CommandSpec::Shell {
            script: script.into(),
        }
    }

    /// Feed `input` to the process's stdin. Ignored for shell specs.
    pub fn with_stdin(self, input: impl Into<String>) -> Self {
        match self {
            CommandSpec::Argv { program, args, .. } => CommandSpec::Argv {
                program,
                args,
                stdin: Some(input.into()),
            },
            shell => shell,
        }
    }

    pub fn program(&self) -> &str {
        match self {
            CommandSpec::Argv { program, .. } => program,
            CommandSpec::Shell { .. } => "/bin/sh",
        }
    }

    fn stdin(&self) -> Option<&str> {
        match self {
            CommandSpec::Argv { stdin, .. } => stdin.as_deref(),
            CommandSpec::Shell { .. } => None,
        }
    }

    fn to_command(&self) -> Command {
        match self {
            CommandSpec::Argv { program, args, .. } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            CommandSpec::Shell { script } => {
                let mut cmd = Command::new("/bin/sh");
                cmd.arg("-c").arg(script);
                cmd
            }
        }
    }
}

/// Captured result of one command run. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct CommandOutput {
    /// Process exit code; `128 + signal` when killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    pub fn truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    /// Trimmed stderr, falling back to stdout, then to `fallback`.
    pub fn failure_message(&self, fallback: &str) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        fallback.to_string()
    }
}

/// Runs host commands with a hard timeout and bounded capture.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    default_timeout: Duration,
    max_timeout: Duration,
    output_cap: usize,
}

impl CommandExecutor {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const MAX_TIMEOUT_SECS: u64 = 300;
    pub const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;

    pub fn new(default_timeout: Duration, max_timeout: Duration, output_cap: usize) -> Self {
        Self {
            default_timeout,
            max_timeout: max_timeout.max(default_timeout),
            output_cap,
        }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self::new(
            Duration::from_secs(config.default_timeout_secs),
            Duration::from_secs(config.max_timeout_secs),
            config.output_cap_bytes,
        )
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Requested timeout, or the default, never above the configured maximum.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        requested
            .filter(|d| !d.is_zero())
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// Run `spec` to completion or until the timeout fires.
    ///
    /// Only infrastructure failures (cannot spawn, cannot wait) are errors.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, GatewayError> {
        let timeout = self.effective_timeout(timeout);
        let stdin_input = spec.stdin().map(str::to_owned);

        let mut cmd = spec.to_command();
        cmd.stdin(if stdin_input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            program = spec.program(),
            timeout_ms = timeout.as_millis() as u64,
            "spawning command"
        );

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| spawn_error(spec.program(), &e))?;
        let mut group = ProcessGroupGuard::new(child.id());

        if let (Some(input), Some(mut pipe)) = (stdin_input, child.stdin.take()) {
            // Written from a task so a child that never reads cannot wedge us.
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin write ended early");
                }
                let _ = pipe.shutdown().await;
            });
        }

        let stdout_buf = Arc::new(Mutex::new(Capture::default()));
        let stderr_buf = Arc::new(Mutex::new(Capture::default()));
        let readers = [
            child
                .stdout
                .take()
                .map(|pipe| tokio::spawn(capture(pipe, stdout_buf.clone(), self.output_cap))),
            child
                .stderr
                .take()
                .map(|pipe| tokio::spawn(capture(pipe, stderr_buf.clone(), self.output_cap))),
        ];

        let (status, timed_out) = tokio::select! {
            status = child.wait() => (status, false),
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    program = spec.program(),
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out, killing process group"
                );
                group.kill();
                let _ = child.start_kill();
                (child.wait().await, true)
            }
        };
        let status = status.map_err(|e| {
            GatewayError::internal(format!("failed to wait for {}: {e}", spec.program()))
        })?;

        let aborts: Vec<_> = readers
            .iter()
            .flatten()
            .map(|handle| handle.abort_handle())
            .collect();
        let drained = tokio::time::timeout(READER_GRACE, async {
            for handle in readers.into_iter().flatten() {
                let _ = handle.await;
            }
        })
        .await;
        if drained.is_err() {
            debug!(program = spec.program(), "output pipes still open after exit, abandoning readers");
            for abort in aborts {
                abort.abort();
            }
        }
        // Backgrounded descendants outlive the leader; take them down with it.
        group.kill();
        group.disarm();

        let (stdout, stdout_truncated) = take_capture(&stdout_buf);
        let (stderr, stderr_truncated) = take_capture(&stderr_buf);
        let output = CommandOutput {
            exit_code: exit_code(&status),
            stdout,
            stderr,
            timed_out,
            stdout_truncated,
            stderr_truncated,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        if output.truncated() {
            warn!(program = spec.program(), cap = self.output_cap, "command output truncated");
        }
        debug!(
            program = spec.program(),
            exit_code = output.exit_code,
            timed_out = output.timed_out,
            duration_ms = output.duration_ms,
            "command finished"
        );
        Ok(output)
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            Duration::from_secs(Self::MAX_TIMEOUT_SECS),
            Self::DEFAULT_OUTPUT_CAP,
        )
    }
}

#[derive(Default)]
struct Capture {
    data: Vec<u8>,
    truncated: bool,
}

/// Read a pipe to EOF, keeping at most `cap` bytes and flagging the rest.
async fn capture<R>(mut pipe: R, buf: Arc<Mutex<Capture>>, cap: usize)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let Ok(mut guard) = buf.lock() else { break };
        let room = cap.saturating_sub(guard.data.len());
        if n > room {
            guard.truncated = true;
        }
        let keep = n.min(room);
        guard.data.extend_from_slice(&chunk[..keep]);
    }
}

fn take_capture(buf: &Mutex<Capture>) -> (String, bool) {
    match buf.lock() {
        Ok(mut guard) => {
            let data = std::mem::take(&mut guard.data);
            (String::from_utf8_lossy(&data).into_owned(), guard.truncated)
        }
        Err(_) => (String::new(), false),
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

fn spawn_error(program: &str, err: &std::io::Error) -> GatewayError {
    match err.kind() {
        std::io::ErrorKind::NotFound => {
            GatewayError::not_found(format!("command not found: {program}"))
        }
        std::io::ErrorKind::PermissionDenied => {
            GatewayError::upstream(format!("permission denied spawning {program}"))
        }
        _ => GatewayError::internal(format!("failed to spawn {program}: {err}")),
    }
}

/// Kills the child's process group on drop unless disarmed.
///
/// Covers both the timeout path and caller cancellation (the `run` future
/// being dropped mid-flight), so no descendant outlives the request.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()).filter(|p| *p > 0),
        }
    }

    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: plain signal delivery to a process group we created.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}
