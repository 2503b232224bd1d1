// Shell command execution with timeout and outcome capture

use crate::env::AmbientEnv;
use std::fmt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

/// Timeout applied when a descriptor does not declare one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code reported when the process did not exit normally
pub const ABNORMAL_EXIT_CODE: i32 = -1;

/// Why an execution failed at the executor level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The process could not be started or its pipes could not be read
    Spawn,
    /// The process outlived its timeout and was killed
    Timeout,
}

/// Result of running one command.
///
/// `success` only reflects whether the process ran to completion within its
/// timeout. A non-zero `exit_code` is data, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub error: String,
    pub exit_code: i32,
    pub failure: Option<FailureKind>,
}

impl ExecutionOutcome {
    fn completed(exit_code: i32, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            success: true,
            output: String::from_utf8_lossy(stdout).into_owned(),
            error: String::from_utf8_lossy(stderr).into_owned(),
            exit_code,
            failure: None,
        }
    }

    fn failed(kind: FailureKind, error: impl fmt::Display) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.to_string(),
            exit_code: ABNORMAL_EXIT_CODE,
            failure: Some(kind),
        }
    }

    fn timed_out(limit: Duration) -> Self {
        Self::failed(
            FailureKind::Timeout,
            format!("Command timed out after {} seconds", format_seconds(limit)),
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.failure == Some(FailureKind::Timeout)
    }
}

/// Run `command` through the platform shell.
///
/// `environment` is the complete environment of the child; nothing is
/// inherited from this process. Stdin is closed. Output is decoded lossily.
/// On timeout the child's process group is killed and the child is reaped
/// before returning.
pub async fn run(
    command: &str,
    working_dir: &Path,
    environment: &AmbientEnv,
    limit: Duration,
) -> ExecutionOutcome {
    tracing::debug!(command, cwd = %working_dir.display(), "Spawning command");

    let mut child = match spawn(command, working_dir, environment) {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(command, error = %e, "Failed to spawn command");
            return ExecutionOutcome::failed(FailureKind::Spawn, e);
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let waited = timeout(limit, async {
        tokio::try_join!(child.wait(), drain(stdout), drain(stderr))
    })
    .await;

    match waited {
        Ok(Ok((status, stdout, stderr))) => {
            let exit_code = exit_code(status);
            tracing::debug!(command, exit_code, "Command finished");
            ExecutionOutcome::completed(exit_code, &stdout, &stderr)
        }
        Ok(Err(e)) => {
            tracing::warn!(command, error = %e, "Lost contact with command");
            terminate(&mut child).await;
            ExecutionOutcome::failed(FailureKind::Spawn, e)
        }
        Err(_) => {
            tracing::warn!(command, timeout_secs = limit.as_secs_f64(), "Command timed out");
            terminate(&mut child).await;
            ExecutionOutcome::timed_out(limit)
        }
    }
}

fn spawn(command: &str, working_dir: &Path, environment: &AmbientEnv) -> std::io::Result<Child> {
    let mut cmd = shell_command(command);
    cmd.current_dir(working_dir)
        .env_clear()
        .envs(environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut cmd = Command::from(cmd);
    cmd.kill_on_drop(true);
    cmd.spawn()
}

#[cfg(unix)]
fn shell_command(command: &str) -> std::process::Command {
    use std::os::unix::process::CommandExt;

    let mut c = std::process::Command::new("sh");
    c.arg("-c").arg(command);
    // Own process group so a timeout can take down the whole pipeline
    c.process_group(0);
    c
}

#[cfg(windows)]
fn shell_command(command: &str) -> std::process::Command {
    let mut c = std::process::Command::new("cmd");
    c.arg("/C").arg(command);
    c
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the child (and its process group on Unix) and wait for it to be reaped
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid, error = %e, "Failed to kill process group"),
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Child already gone");
    }
    if let Err(e) = child.wait().await {
        tracing::warn!(error = %e, "Failed to reap child");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    ABNORMAL_EXIT_CODE
}

fn format_seconds(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        d.as_secs_f64().to_string()
    }
}
