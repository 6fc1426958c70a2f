use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::RunnerConfig;
use crate::execution::{ExecutionResult, RUNNER_EXIT_CODE};
use crate::strategy::{CliStrategy, CommandSpec};

const READ_CHUNK: usize = 8 * 1024;

/// How long pipes are drained after the backend itself has exited.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    TimedOutInactivity,
    TimedOutMax,
    SpawnFailed(String),
}

/// Raw result of one subprocess run, before classification.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl RunOutcome {
    fn spawn_failed(reason: String, elapsed: Duration) -> Self {
        Self {
            status: RunStatus::SpawnFailed(reason),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: RUNNER_EXIT_CODE,
            elapsed,
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(
            self.status,
            RunStatus::TimedOutInactivity | RunStatus::TimedOutMax
        )
    }
}

/// Runs one backend invocation to completion or until either clock fires.
///
/// Every chunk read from stdout or stderr pushes the inactivity deadline
/// forward; the absolute deadline is fixed at spawn. Whichever expires first
/// kills the whole process group. Once the backend exits, leftover
/// descendants holding the pipes get a short drain window and are then killed.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    inactivity_timeout: Duration,
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

impl ProcessRunner {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self {
            inactivity_timeout,
            kill_grace: Duration::from_millis(100),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.inactivity_timeout())
            .with_kill_grace(Duration::from_millis(config.kill_grace_ms))
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    pub async fn run(&self, spec: &CommandSpec, max_timeout: Duration) -> RunOutcome {
        let started = Instant::now();
        if spec.program().is_empty() {
            return RunOutcome::spawn_failed("empty command line".into(), started.elapsed());
        }

        let mut command = Command::new(spec.program());
        command
            .args(spec.args())
            .envs(&spec.env)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        isolate_process_group(&mut command);

        debug!(
            argv = ?spec.redacted_argv(),
            dir = %spec.working_dir.display(),
            max_timeout_secs = max_timeout.as_secs_f64(),
            inactivity_secs = self.inactivity_timeout.as_secs_f64(),
            "Spawning backend process"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = spec.program(), error = %e, "Failed to spawn backend");
                return RunOutcome::spawn_failed(e.to_string(), started.elapsed());
            }
        };

        let pid = child.id();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_open = stdout.is_some();
        let mut err_open = stderr.is_some();
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_chunk = vec![0u8; READ_CHUNK];
        let mut err_chunk = vec![0u8; READ_CHUNK];

        let hard_deadline = started + max_timeout;
        let mut idle_deadline = started + self.inactivity_timeout;
        let mut drain_deadline = hard_deadline;
        let mut exited = false;
        let mut exit_code = RUNNER_EXIT_CODE;

        let status = loop {
            if exited && !out_open && !err_open {
                break RunStatus::Completed;
            }
            tokio::select! {
                read = read_chunk(&mut stdout, &mut out_chunk), if out_open => match read {
                    Ok(0) => out_open = false,
                    Ok(n) => {
                        out_buf.extend_from_slice(&out_chunk[..n]);
                        idle_deadline = Instant::now() + self.inactivity_timeout;
                    }
                    Err(e) => {
                        debug!(error = %e, "stdout read failed");
                        out_open = false;
                    }
                },
                read = read_chunk(&mut stderr, &mut err_chunk), if err_open => match read {
                    Ok(0) => err_open = false,
                    Ok(n) => {
                        err_buf.extend_from_slice(&err_chunk[..n]);
                        idle_deadline = Instant::now() + self.inactivity_timeout;
                    }
                    Err(e) => {
                        debug!(error = %e, "stderr read failed");
                        err_open = false;
                    }
                },
                waited = child.wait(), if !exited => {
                    match waited {
                        Ok(status) => exit_code = status.code().unwrap_or(RUNNER_EXIT_CODE),
                        Err(e) => warn!(error = %e, "Failed to collect backend exit status"),
                    }
                    exited = true;
                    drain_deadline = (Instant::now() + EXIT_DRAIN_GRACE).min(hard_deadline);
                }
                _ = sleep_until(drain_deadline), if exited => {
                    debug!(
                        program = spec.program(),
                        exit_code,
                        "Backend exited but pipes are still open, killing leftover processes"
                    );
                    kill_process_group(pid);
                    break RunStatus::Completed;
                }
                _ = sleep_until(idle_deadline), if !exited => {
                    warn!(
                        program = spec.program(),
                        elapsed_secs = started.elapsed().as_secs(),
                        "No output within inactivity window, killing backend"
                    );
                    self.terminate(&mut child, pid).await;
                    break RunStatus::TimedOutInactivity;
                }
                _ = sleep_until(hard_deadline), if !exited => {
                    warn!(
                        program = spec.program(),
                        max_timeout_secs = max_timeout.as_secs(),
                        "Maximum timeout reached, killing backend"
                    );
                    self.terminate(&mut child, pid).await;
                    break RunStatus::TimedOutMax;
                }
            }
        };

        let elapsed = started.elapsed();
        debug!(
            ?status,
            exit_code,
            elapsed_ms = elapsed.as_millis() as u64,
            "Backend process finished"
        );

        RunOutcome {
            status,
            stdout: String::from_utf8_lossy(&out_buf).into_owned(),
            stderr: String::from_utf8_lossy(&err_buf).into_owned(),
            exit_code,
            elapsed,
        }
    }

    /// Run `spec` and turn the outcome into an [`ExecutionResult`]. Runner
    /// failures get exit code -1 and are never retryable; completed runs are
    /// classified by the strategy.
    pub async fn execute(
        &self,
        strategy: &dyn CliStrategy,
        spec: &CommandSpec,
        max_timeout: Duration,
    ) -> ExecutionResult {
        let outcome = self.run(spec, max_timeout).await;
        let backend = match spec.backend() {
            "" => strategy.name(),
            name => name,
        };

        let result = match &outcome.status {
            RunStatus::Completed => {
                strategy.parse_output(&outcome.stdout, &outcome.stderr, outcome.exit_code)
            }
            RunStatus::TimedOutInactivity => ExecutionResult::failure(
                spec.model(),
                format!(
                    "{backend} timed out after {} without output",
                    format_secs(self.inactivity_timeout)
                ),
                format!(
                    "No output activity on stdout or stderr for {}; process killed after {}",
                    format_secs(self.inactivity_timeout),
                    format_secs(outcome.elapsed)
                ),
                RUNNER_EXIT_CODE,
            ),
            RunStatus::TimedOutMax => ExecutionResult::failure(
                spec.model(),
                format!("{backend} timed out after {}", format_secs(max_timeout)),
                format!(
                    "Exceeded maximum timeout of {}; process killed",
                    format_secs(max_timeout)
                ),
                RUNNER_EXIT_CODE,
            ),
            RunStatus::SpawnFailed(reason) => ExecutionResult::failure(
                spec.model(),
                format!("Failed to start {backend} ({})", spec.program()),
                reason.clone(),
                RUNNER_EXIT_CODE,
            ),
        };

        let mut result = result
            .with_output(outcome.stdout, outcome.stderr)
            .with_elapsed(outcome.elapsed);
        if result.model.is_empty() {
            result.model = spec.model().to_string();
        }

        info!(
            backend,
            success = result.success,
            exit_code = result.exit_code,
            retryable = result.retryable,
            elapsed_ms = result.elapsed_ms,
            "{}",
            result.summary
        );
        result
    }

    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        kill_process_group(pid);
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "Backend already exited");
        }
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(?status, "Killed backend reaped"),
            Ok(Err(e)) => warn!(error = %e, "Failed to reap killed backend"),
            Err(_) => warn!("Killed backend not reaped within grace period"),
        }
    }
}

async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

fn format_secs(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(unix)]
fn isolate_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_command: &mut Command) {}

/// SIGKILL the group created by `process_group(0)`; the leader's pid is the group id.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::BackendSettings;
    use crate::strategy::AiderStrategy;

    fn shell(script: &str) -> CommandSpec {
        CommandSpec::new(
            vec!["sh".into(), "-c".into(), script.into()],
            std::env::temp_dir(),
        )
        .with_metadata("backend", "aider")
        .with_metadata("model", "openrouter/test-model")
    }

    fn aider() -> AiderStrategy {
        AiderStrategy::new(BackendSettings::aider())
    }

    #[tokio::test]
    async fn test_completed_run_captures_both_streams() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let outcome = runner
            .run(&shell("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_execute_classifies_success() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let result = runner
            .execute(
                &aider(),
                &shell("echo 'Applied edit to src/a.rs'"),
                Duration::from_secs(5),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.touched_files, vec!["src/a.rs"]);
        assert_eq!(result.model, "openrouter/test-model");
    }

    #[tokio::test]
    async fn test_short_inactivity_window() {
        let runner = ProcessRunner::new(Duration::from_millis(300));
        let result = runner
            .execute(&aider(), &shell("sleep 5"), Duration::from_secs(10))
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
        assert!(result.summary.contains("timed out"));
        assert!(result.notes.contains("activity"));
        assert!(result.elapsed_ms < 4_000);
    }

    #[tokio::test]
    async fn test_short_max_timeout() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let result = runner
            .execute(
                &aider(),
                &shell("while true; do echo tick; sleep 0.1; done"),
                Duration::from_millis(800),
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
        assert!(result.summary.contains("timed out"));
        assert!(result.notes.contains("maximum timeout"));
        assert!(!result.notes.contains("activity"));
        assert!(result.stdout.contains("tick"));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = ProcessRunner::default();
        let spec = CommandSpec::new(
            vec!["/nonexistent/agent-dispatch-missing".into()],
            Path::new("/"),
        );
        let result = runner.execute(&aider(), &spec, Duration::from_secs(1)).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, RUNNER_EXIT_CODE);
        assert!(result.summary.starts_with("Failed to start"));
        assert!(!result.notes.is_empty());
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn test_empty_argv_is_spawn_failure() {
        let outcome = ProcessRunner::default()
            .run(&CommandSpec::new(Vec::new(), "/"), Duration::from_secs(1))
            .await;
        assert!(matches!(outcome.status, RunStatus::SpawnFailed(_)));
        assert!(!outcome.timed_out());
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(Duration::from_secs(20)), "20s");
        assert_eq!(format_secs(Duration::from_millis(1500)), "1.5s");
    }
}
