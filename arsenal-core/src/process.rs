//! Child process execution with hard timeouts
//!
//! Every external command (security tools, git, go, pip) goes through
//! [`ProcessRunner::run`]. Failure to spawn, nonzero exit, and timeout are all
//! represented in the returned [`ProcessResult`], never as an `Err`.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Structured outcome of one child process run
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    /// Exit code; -1 when the process failed to spawn, was killed, or timed out
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the wall-clock deadline expired and the process group was killed
    pub timed_out: bool,
    /// Set when the process could not be started at all
    pub spawn_error: Option<String>,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && self.spawn_error.is_none()
    }

    fn spawn_failed(message: String) -> Self {
        Self {
            exit_code: -1,
            spawn_error: Some(message),
            ..Self::default()
        }
    }

    /// Best available error text: stderr, else the spawn/timeout explanation
    pub fn error_text(&self) -> String {
        if let Some(ref err) = self.spawn_error {
            return err.clone();
        }
        if self.timed_out {
            return "command timed out".to_string();
        }
        self.stderr.trim().to_string()
    }
}

/// Runs external commands as discrete argument vectors (no shell)
pub struct ProcessRunner;

impl ProcessRunner {
    /// Run `program` with `args`, enforcing `timeout` on the whole process group.
    ///
    /// On timeout the process group is killed so tools that shell out further
    /// do not leave orphans behind. Dropping the returned future before it
    /// completes (operator cancellation) kills the group the same way.
    pub async fn run<I, S>(
        program: &str,
        args: I,
        timeout: Duration,
        working_dir: Option<&Path>,
    ) -> ProcessResult
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                debug!(program, "spawn failed: {err}");
                return ProcessResult::spawn_failed(format!("spawn failed: {err}"));
            }
        };
        let pid = child.id();
        // Armed until the child is reaped: if this future is dropped at an
        // await point, the guard kills the whole group, not just the child
        let mut reaper = GroupReaper::armed(pid);

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let stdout_fut = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        let stderr_fut = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        let wait_fut = async {
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => (status.code().unwrap_or(-1), false, None),
                Ok(Err(err)) => (-1, false, Some(format!("wait failed: {err}"))),
                Err(_) => {
                    warn!(program, ?timeout, "command exceeded deadline, killing");
                    kill_process_group(&mut child, pid);
                    let _ = child.wait().await;
                    (-1, true, None)
                }
            }
        };

        let (stdout, stderr, (exit_code, timed_out, spawn_error)) =
            tokio::join!(stdout_fut, stderr_fut, wait_fut);
        reaper.disarm();

        ProcessResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
            spawn_error,
        }
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child, pid: Option<u32>) {
    // The child was made a group leader via process_group(0), so killing the
    // group reaps its whole subtree.
    kill_group(pid);
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Kills the child's process group when dropped while still armed. Disarmed
/// once the child has been waited on, so a finished run never signals a
/// recycled pgid.
struct GroupReaper {
    pid: Option<u32>,
    armed: bool,
}

impl GroupReaper {
    fn armed(pid: Option<u32>) -> Self {
        Self { pid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupReaper {
    fn drop(&mut self) {
        if self.armed {
            kill_group(self.pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_captures_stdout() {
        let result = ProcessRunner::run("echo", ["hello"], TIMEOUT, None).await;
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let result = ProcessRunner::run("sh", ["-c", "echo oops >&2; exit 3"], TIMEOUT, None).await;
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr.trim(), "oops");
        assert!(result.spawn_error.is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_structured() {
        let result =
            ProcessRunner::run("definitely-not-a-real-binary-xyz", ["--help"], TIMEOUT, None).await;
        assert_eq!(result.exit_code, -1);
        assert!(result.spawn_error.is_some());
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let start = std::time::Instant::now();
        let result =
            ProcessRunner::run("sleep", ["30"], Duration::from_millis(200), None).await;
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_run_reaps_process_group() {
        // A sleep duration unique to this test run, so pgrep only matches
        // children we started here
        let tag = format!("300.{:06}", std::process::id() % 1_000_000);
        let script = format!("sleep {tag} & sleep {tag}");

        // Drop the run future mid-flight, as cancellation does
        let run = ProcessRunner::run("sh", ["-c", script.as_str()], TIMEOUT, None);
        let dropped = tokio::time::timeout(Duration::from_millis(300), run).await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let pattern = format!("sleep {tag}");
        let check =
            ProcessRunner::run("pgrep", ["-f", pattern.as_str()], TIMEOUT, None).await;
        assert!(
            !check.success(),
            "background child survived drop: {}",
            check.stdout
        );
    }

    #[tokio::test]
    async fn test_working_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let result = ProcessRunner::run("pwd", [] as [&str; 0], TIMEOUT, Some(temp.path())).await;
        assert!(result.success());
        // Canonicalize to survive /tmp symlinks on macOS
        let reported = std::path::PathBuf::from(result.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            temp.path().canonicalize().unwrap()
        );
    }
}
