//! Shell command execution with an enforced timeout.
//!
//! Each command runs as `/bin/sh -c <command>` in its own process group. When
//! the timeout expires the whole group is killed, so a `sleep` forked by the
//! shell does not outlive the action. Stdout and stderr are captured into one
//! buffer in arrival order.
//!
//! # Working directory
//!
//! The first of these that is set wins:
//! 1. the action's own `workdir`
//! 2. the runner's default `workdir`
//! 3. the home directory of the user running the listener
//! 4. `/tmp`

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{ActionOutcome, ActionStatus, ShellAction};

/// Shell used to interpret commands.
const SHELL: &str = "/bin/sh";

/// Default per-command timeout (5 minutes).
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(300);

/// Working directory used when nothing else is configured and there is no
/// home directory.
pub const FALLBACK_WORKDIR: &str = "/tmp";

/// Upper bound on captured output per command. Further output is discarded.
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How long to keep reading output after the process has exited or been
/// killed. A daemonized grandchild can hold the pipe open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Errors from running a shell command. Folded into [`ActionStatus::Failed`].
#[derive(Debug, Error)]
pub enum ShellError {
    /// The shell process could not be started.
    #[error("failed to spawn /bin/sh: {0}")]
    Spawn(#[source] std::io::Error),

    /// Waiting on the process failed.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    /// The command ran and exited unsuccessfully.
    #[error("command exited with {0}")]
    NonZeroExit(ExitStatus),
}

/// Which parts of the listener's environment spawned commands see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvPolicy {
    /// Commands inherit the full environment of the listener process.
    #[default]
    InheritAll,

    /// Commands see only the named variables (those that are set).
    AllowList(Vec<String>),
}

impl EnvPolicy {
    /// Returns the environment for a spawned command, or `None` to inherit.
    fn filtered_env(&self) -> Option<Vec<(String, OsString)>> {
        match self {
            EnvPolicy::InheritAll => None,
            EnvPolicy::AllowList(keys) => Some(
                keys.iter()
                    .filter_map(|key| std::env::var_os(key).map(|value| (key.clone(), value)))
                    .collect(),
            ),
        }
    }
}

/// Runs [`ShellAction`]s.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Timeout for actions that do not set their own.
    pub default_timeout: Duration,

    /// Working directory for actions that do not set their own.
    pub default_workdir: Option<PathBuf>,

    pub env: EnvPolicy,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    /// Creates a runner with the 5 minute timeout, no default working
    /// directory and full environment inheritance.
    pub fn new() -> Self {
        ShellRunner {
            default_timeout: DEFAULT_SHELL_TIMEOUT,
            default_workdir: None,
            env: EnvPolicy::InheritAll,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.default_workdir = Some(workdir.into());
        self
    }

    pub fn with_env_policy(mut self, env: EnvPolicy) -> Self {
        self.env = env;
        self
    }

    /// Returns the directory `action` will run in.
    pub fn resolve_workdir(&self, action: &ShellAction) -> PathBuf {
        action
            .workdir
            .clone()
            .or_else(|| self.default_workdir.clone())
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_WORKDIR))
    }

    /// Runs a shell action to completion or timeout.
    ///
    /// Never fails: spawn errors, non-zero exits and timeouts are all reported
    /// through the returned outcome's status.
    pub async fn run(&self, action: &ShellAction) -> ActionOutcome {
        let timeout = action.timeout.unwrap_or(self.default_timeout);
        let workdir = self.resolve_workdir(action);
        let started = Instant::now();

        let (status, output) = match self.spawn(&action.command, &workdir) {
            Ok(child) => {
                let (status, output) = supervise(child, timeout).await;
                (status, Some(output))
            }
            Err(e) => (
                ActionStatus::Failed {
                    reason: e.to_string(),
                    exit_code: None,
                },
                None,
            ),
        };

        ActionOutcome {
            label: action.command.clone(),
            status,
            output,
            elapsed: started.elapsed(),
        }
    }

    fn spawn(&self, command: &str, workdir: &Path) -> Result<Child, ShellError> {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = self.env.filtered_env() {
            cmd.env_clear();
            cmd.envs(env);
        }

        // Leader of a fresh group, so the timeout can kill the whole tree.
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = %command, workdir = %workdir.display(), "Spawning shell command");
        cmd.spawn().map_err(ShellError::Spawn)
    }
}

/// Waits for `child` up to `timeout`, collecting its output.
async fn supervise(mut child: Child, timeout: Duration) -> (ActionStatus, String) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, Arc::clone(&buffer)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, Arc::clone(&buffer)));
    }

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(exit)) if exit.success() => ActionStatus::Succeeded,
        Ok(Ok(exit)) => ActionStatus::Failed {
            reason: ShellError::NonZeroExit(exit).to_string(),
            exit_code: exit.code(),
        },
        Ok(Err(e)) => ActionStatus::Failed {
            reason: ShellError::Wait(e).to_string(),
            exit_code: None,
        },
        Err(_) => {
            terminate(&mut child).await;
            ActionStatus::TimedOut { timeout }
        }
    };

    drain(readers).await;

    let bytes = std::mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

/// Copies everything from `reader` into the shared buffer, up to
/// [`MAX_OUTPUT_BYTES`] in total.
fn spawn_reader<R>(mut reader: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut out = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    let room = MAX_OUTPUT_BYTES.saturating_sub(out.len());
                    out.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    })
}

/// Waits for the output readers to hit EOF, giving up after
/// [`OUTPUT_DRAIN_GRACE`].
async fn drain(readers: Vec<JoinHandle<()>>) {
    let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
    let joined = async {
        for reader in readers {
            let _ = reader.await;
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN_GRACE, joined).await.is_err() {
        debug!("Output pipe still open after grace period; abandoning reader");
        for abort in aborts {
            abort.abort();
        }
    }
}

/// Kills the command's process group, then the shell itself, and reaps it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                debug!(pid, error = %e, "Failed to kill process group");
            }
        }
    }

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill shell process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn runner() -> ShellRunner {
        ShellRunner::new().with_default_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn success_captures_output() {
        let outcome = runner().run(&ShellAction::new("echo hi")).await;

        assert_eq!(outcome.status, ActionStatus::Succeeded);
        assert_eq!(outcome.output.as_deref(), Some("hi\n"));
        assert_eq!(outcome.label, "echo hi");
    }

    #[tokio::test]
    async fn success_without_output_is_empty_not_none() {
        let outcome = runner().run(&ShellAction::new("true")).await;

        assert_eq!(outcome.status, ActionStatus::Succeeded);
        assert_eq!(outcome.output.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn stderr_is_captured_with_stdout() {
        let outcome = runner()
            .run(&ShellAction::new("echo out; sleep 0.1; echo err >&2"))
            .await;

        assert_eq!(outcome.output.as_deref(), Some("out\nerr\n"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure_and_keeps_output() {
        let outcome = runner()
            .run(&ShellAction::new("echo broken >&2; exit 3"))
            .await;

        match &outcome.status {
            ActionStatus::Failed { exit_code, .. } => assert_eq!(*exit_code, Some(3)),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(outcome.output.as_deref(), Some("broken\n"));
    }

    #[tokio::test]
    async fn spawn_failure_reports_failed_without_output() {
        let action = ShellAction::new("echo hi").with_workdir("/nonexistent/webhook-listener-dir");
        let outcome = runner().run(&action).await;

        match &outcome.status {
            ActionStatus::Failed { reason, exit_code } => {
                assert!(reason.contains("failed to spawn"), "reason: {}", reason);
                assert_eq!(*exit_code, None);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(outcome.output, None);
    }

    #[tokio::test]
    async fn timeout_is_reported_as_timeout() {
        let action = ShellAction::new("sleep 5").with_timeout(Duration::from_millis(200));
        let outcome = runner().run(&action).await;

        assert_eq!(
            outcome.status,
            ActionStatus::TimedOut {
                timeout: Duration::from_millis(200)
            }
        );
        assert!(outcome.elapsed < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn timeout_kills_the_whole_process_tree() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("marker");
        // The subshell is a separate process that outlives a killed parent
        // shell unless its whole group is killed.
        let command = format!("( sleep 1; touch {} ) ; wait", marker.display());
        let action = ShellAction::new(command).with_timeout(Duration::from_millis(200));

        let outcome = runner().run(&action).await;
        assert!(outcome.status.is_timeout());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            !marker.exists(),
            "subshell survived the timeout and touched the marker"
        );
    }

    #[tokio::test]
    async fn timeout_keeps_partial_output() {
        let action =
            ShellAction::new("echo started; sleep 5").with_timeout(Duration::from_millis(300));
        let outcome = runner().run(&action).await;

        assert!(outcome.status.is_timeout());
        assert_eq!(outcome.output.as_deref(), Some("started\n"));
    }

    #[tokio::test]
    async fn runs_in_action_workdir() {
        let dir = tempdir().unwrap();
        let action = ShellAction::new("pwd -P").with_workdir(dir.path());
        let outcome = runner().run(&action).await;

        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            outcome.output.as_deref().map(str::trim_end),
            Some(expected.to_str().unwrap())
        );
    }

    #[test]
    fn workdir_resolution_order() {
        let action = ShellAction::new("true");
        let with_override = ShellAction::new("true").with_workdir("/srv/action");

        let plain = ShellRunner::new();
        let expected_plain = dirs::home_dir().unwrap_or_else(|| PathBuf::from(FALLBACK_WORKDIR));
        assert_eq!(plain.resolve_workdir(&action), expected_plain);

        let with_default = ShellRunner::new().with_default_workdir("/srv/default");
        assert_eq!(
            with_default.resolve_workdir(&action),
            PathBuf::from("/srv/default")
        );
        assert_eq!(
            with_default.resolve_workdir(&with_override),
            PathBuf::from("/srv/action")
        );
    }

    #[tokio::test]
    async fn allow_list_hides_other_variables() {
        let action = ShellAction::new("echo \"${PATH:-unset}\"");

        let restricted = runner().with_env_policy(EnvPolicy::AllowList(vec![]));
        let outcome = restricted.run(&action).await;
        assert_eq!(outcome.output.as_deref(), Some("unset\n"));
    }

    #[tokio::test]
    async fn allow_list_passes_named_variables() {
        let Some(path) = std::env::var_os("PATH") else {
            return;
        };
        let action = ShellAction::new("echo \"$PATH\"");

        let restricted = runner().with_env_policy(EnvPolicy::AllowList(vec!["PATH".to_string()]));
        let outcome = restricted.run(&action).await;
        assert_eq!(
            outcome.output.as_deref().map(str::trim_end),
            path.to_str()
        );
    }

    #[tokio::test]
    async fn inherit_all_passes_environment() {
        let Some(path) = std::env::var_os("PATH") else {
            return;
        };
        let outcome = runner().run(&ShellAction::new("echo \"$PATH\"")).await;
        assert_eq!(
            outcome.output.as_deref().map(str::trim_end),
            path.to_str()
        );
    }

    #[tokio::test]
    async fn output_is_capped() {
        let command = format!("head -c {} /dev/zero", MAX_OUTPUT_BYTES + 4096);
        let outcome = runner().run(&ShellAction::new(command)).await;

        assert_eq!(outcome.status, ActionStatus::Succeeded);
        assert_eq!(outcome.output.map(|o| o.len()), Some(MAX_OUTPUT_BYTES));
    }
}
