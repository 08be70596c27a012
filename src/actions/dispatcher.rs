//! Runs the actions of matched rules.
//!
//! Actions run strictly in order: rule by rule in configuration order, and
//! within a rule in list order. Each action is isolated. A failure, timeout or
//! unknown kind is logged and the next action still runs.
//!
//! # Concurrency
//!
//! By default nothing serializes deliveries: two pushes to the same repository
//! arriving together run their commands concurrently. Repositories can opt in
//! to serialization, in which case one delivery's actions finish before the
//! next delivery's actions for that repository start.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::rules::Rule;
use crate::types::RepoName;

use super::{Action, ActionOutcome, ActionStatus, ShellRunner};

/// Executes actions for accepted deliveries.
#[derive(Debug, Default)]
pub struct Dispatcher {
    runner: ShellRunner,

    /// Execution locks for repositories that opted into serialization.
    /// Built once at startup and never modified.
    locks: HashMap<RepoName, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(runner: ShellRunner) -> Self {
        Dispatcher {
            runner,
            locks: HashMap::new(),
        }
    }

    /// Serializes action execution for the given repositories.
    pub fn with_serialized_repos<I>(mut self, repos: I) -> Self
    where
        I: IntoIterator<Item = RepoName>,
    {
        self.locks = repos
            .into_iter()
            .map(|repo| (repo, Arc::new(Mutex::new(()))))
            .collect();
        self
    }

    /// Returns true if deliveries for `repo` are serialized.
    pub fn is_serialized(&self, repo: &RepoName) -> bool {
        self.locks.contains_key(repo.as_str())
    }

    /// Runs every action of every rule in `rules`, in order.
    ///
    /// Holds the repository's lock for the whole delivery when the repository
    /// is serialized.
    pub async fn dispatch_rules(&self, repo: &RepoName, rules: &[&Rule]) -> Vec<ActionOutcome> {
        let _guard = match self.locks.get(repo.as_str()) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut outcomes = Vec::new();
        for rule in rules {
            outcomes.extend(self.dispatch(repo, &rule.actions).await);
        }
        outcomes
    }

    /// Runs `actions` sequentially, logging each outcome.
    ///
    /// Does not take the repository lock; callers running a whole delivery
    /// should use [`Dispatcher::dispatch_rules`].
    pub async fn dispatch(&self, repo: &RepoName, actions: &[Action]) -> Vec<ActionOutcome> {
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = match action {
                Action::Shell(shell) => {
                    info!(repo = %repo, command = %shell.command, "Executing shell action");
                    self.runner.run(shell).await
                }
                Action::Unrecognized { kind } => ActionOutcome::unrecognized(kind.as_str()),
            };
            log_outcome(repo, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }
}

fn log_outcome(repo: &RepoName, outcome: &ActionOutcome) {
    let elapsed_ms = u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX);
    let output = outcome.output.as_deref().unwrap_or_default();

    match &outcome.status {
        ActionStatus::Succeeded => {
            if output.is_empty() {
                info!(repo = %repo, command = %outcome.label, elapsed_ms, "Shell action succeeded with no output");
            } else {
                info!(repo = %repo, command = %outcome.label, elapsed_ms, output = %output, "Shell action succeeded");
            }
        }
        ActionStatus::Failed { reason, exit_code } => {
            warn!(
                repo = %repo,
                command = %outcome.label,
                elapsed_ms,
                exit_code = ?exit_code,
                error = %reason,
                output = %output,
                "Shell action failed"
            );
        }
        ActionStatus::TimedOut { timeout } => {
            warn!(
                repo = %repo,
                command = %outcome.label,
                timeout = ?timeout,
                output = %output,
                "Shell action timed out and was killed"
            );
        }
        ActionStatus::Unrecognized { kind } => {
            warn!(repo = %repo, kind = %kind, "Skipping action with unrecognized type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ShellAction;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn shell(command: impl Into<String>) -> Action {
        Action::Shell(ShellAction::new(command))
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ShellRunner::new().with_default_timeout(Duration::from_secs(10)))
    }

    fn repo() -> RepoName {
        RepoName::from("acme/app")
    }

    #[tokio::test]
    async fn actions_run_in_order() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("log");
        let actions = vec![
            shell(format!("echo one >> {}", log.display())),
            shell(format!("echo two >> {}", log.display())),
            shell(format!("echo three >> {}", log.display())),
        ];

        let outcomes = dispatcher().dispatch(&repo(), &actions).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.status.is_success()));
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn failure_does_not_stop_later_actions() {
        let actions = vec![shell("exit 1"), shell("echo after")];

        let outcomes = dispatcher().dispatch(&repo(), &actions).await;

        assert!(matches!(outcomes[0].status, ActionStatus::Failed { .. }));
        assert_eq!(outcomes[1].status, ActionStatus::Succeeded);
        assert_eq!(outcomes[1].output.as_deref(), Some("after\n"));
    }

    #[tokio::test]
    async fn timeout_does_not_stop_later_actions() {
        let actions = vec![
            Action::Shell(ShellAction::new("sleep 5").with_timeout(Duration::from_millis(100))),
            shell("echo after"),
        ];

        let outcomes = dispatcher().dispatch(&repo(), &actions).await;

        assert!(outcomes[0].status.is_timeout());
        assert_eq!(outcomes[1].status, ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn unrecognized_kind_is_skipped() {
        let actions = vec![
            Action::Unrecognized {
                kind: "email".to_string(),
            },
            shell("echo after"),
        ];

        let outcomes = dispatcher().dispatch(&repo(), &actions).await;

        assert_eq!(
            outcomes[0].status,
            ActionStatus::Unrecognized {
                kind: "email".to_string()
            }
        );
        assert_eq!(outcomes[1].status, ActionStatus::Succeeded);
    }

    #[tokio::test]
    async fn dispatch_rules_runs_all_rules_in_order() {
        let first = Rule::new("push").with_action(shell("echo A"));
        let second = Rule::new("push")
            .with_branches(["main"])
            .with_action(shell("echo B"));

        let outcomes = dispatcher()
            .dispatch_rules(&repo(), &[&first, &second])
            .await;

        let outputs: Vec<_> = outcomes.iter().map(|o| o.output.as_deref()).collect();
        assert_eq!(outputs, vec![Some("A\n"), Some("B\n")]);
    }

    #[tokio::test]
    async fn empty_rule_list_runs_nothing() {
        let outcomes = dispatcher().dispatch_rules(&repo(), &[]).await;
        assert!(outcomes.is_empty());
    }

    #[test]
    fn serialization_is_opt_in() {
        let plain = dispatcher();
        assert!(!plain.is_serialized(&repo()));

        let serialized = dispatcher().with_serialized_repos([repo()]);
        assert!(serialized.is_serialized(&repo()));
        assert!(!serialized.is_serialized(&RepoName::from("acme/other")));
    }

    #[tokio::test]
    async fn unserialized_deliveries_overlap() {
        let d = Arc::new(dispatcher());
        let rule = Arc::new(Rule::new("push").with_action(shell("sleep 0.5")));

        let started = Instant::now();
        let a = {
            let (d, rule) = (Arc::clone(&d), Arc::clone(&rule));
            tokio::spawn(async move { d.dispatch_rules(&repo(), &[&*rule]).await })
        };
        let b = {
            let (d, rule) = (Arc::clone(&d), Arc::clone(&rule));
            tokio::spawn(async move { d.dispatch_rules(&repo(), &[&*rule]).await })
        };
        a.await.unwrap();
        b.await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(950));
    }

    #[tokio::test]
    async fn serialized_deliveries_do_not_overlap() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("log");
        let d = Arc::new(dispatcher().with_serialized_repos([repo()]));
        let command = format!(
            "echo start >> {log}; sleep 0.3; echo end >> {log}",
            log = log.display()
        );
        let rule = Arc::new(Rule::new("push").with_action(shell(command)));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let (d, rule) = (Arc::clone(&d), Arc::clone(&rule));
                tokio::spawn(async move { d.dispatch_rules(&repo(), &[&*rule]).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            std::fs::read_to_string(&log).unwrap(),
            "start\nend\nstart\nend\n"
        );
    }
}
