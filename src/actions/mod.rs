//! Actions run when a rule matches, and the records of how they went.
//!
//! Action outcomes are observability data, not control data: every action
//! produces an [`ActionOutcome`] that is logged, and none of them can turn an
//! accepted delivery into an HTTP error.
//!
//! # Module Structure
//!
//! - [`shell`]: runs a command through `/bin/sh` with a timeout
//! - [`dispatcher`]: runs the actions of matched rules in order

pub mod dispatcher;
pub mod shell;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use dispatcher::Dispatcher;
pub use shell::{EnvPolicy, ShellError, ShellRunner};

/// A configured side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a command through the system shell.
    Shell(ShellAction),

    /// An action `type` this build does not know. Skipped at dispatch time.
    Unrecognized {
        /// The `type` value from the configuration.
        kind: String,
    },
}

impl Action {
    /// Short label used in log lines.
    pub fn label(&self) -> &str {
        match self {
            Action::Shell(shell) => &shell.command,
            Action::Unrecognized { kind } => kind,
        }
    }
}

/// A shell command and its per-action overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellAction {
    /// Command line passed to `sh -c`.
    pub command: String,

    /// Working directory override. Falls back to the runner's default.
    pub workdir: Option<PathBuf>,

    /// Timeout override. Falls back to the runner's default.
    pub timeout: Option<Duration>,
}

impl ShellAction {
    pub fn new(command: impl Into<String>) -> Self {
        ShellAction {
            command: command.into(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How an action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// The command exited with status zero.
    Succeeded,

    /// The command could not be spawned, could not be waited on, or exited
    /// non-zero.
    Failed {
        /// Human-readable cause.
        reason: String,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
    },

    /// The command outlived its timeout and was killed.
    TimedOut {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The action kind is unknown; nothing ran.
    Unrecognized {
        /// The unknown `type` value.
        kind: String,
    },
}

impl ActionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionStatus::Succeeded)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ActionStatus::TimedOut { .. })
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Succeeded => write!(f, "succeeded"),
            ActionStatus::Failed { reason, .. } => write!(f, "failed: {}", reason),
            ActionStatus::TimedOut { timeout } => write!(f, "timed out after {:?}", timeout),
            ActionStatus::Unrecognized { kind } => write!(f, "unrecognized action type: {}", kind),
        }
    }
}

/// Record of a single action's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// What ran (the command line, or the unknown kind).
    pub label: String,

    pub status: ActionStatus,

    /// Combined stdout and stderr.
    ///
    /// `None` when no process ran. `Some("")` when the process ran and printed
    /// nothing.
    pub output: Option<String>,

    /// Wall-clock time spent on the action.
    pub elapsed: Duration,
}

impl ActionOutcome {
    /// Outcome for an action kind that was skipped.
    pub fn unrecognized(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        ActionOutcome {
            label: kind.clone(),
            status: ActionStatus::Unrecognized { kind },
            output: None,
            elapsed: Duration::ZERO,
        }
    }
}
