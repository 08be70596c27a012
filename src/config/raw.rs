//! Raw configuration structures for deserialization.
//!
//! These mirror the YAML file. Fields are defaulted liberally so that
//! validation, not serde, reports what is missing and where.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::{Config, ConfigError, RepoConfig, Result, ShellSettings};
use crate::actions::shell::DEFAULT_SHELL_TIMEOUT;
use crate::actions::{Action, EnvPolicy, ShellAction};
use crate::rules::Rule;
use crate::types::RepoName;

/// Action `type` for shell commands.
const SHELL_ACTION: &str = "shell";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawConfig {
    #[serde(default)]
    shell: RawShell,

    // BTreeMap so validation errors come out in a stable order.
    #[serde(default)]
    repos: BTreeMap<String, Option<RawRepo>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawShell {
    timeout_secs: Option<u64>,
    workdir: Option<PathBuf>,
    #[serde(default)]
    env: RawEnv,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnv {
    #[serde(default)]
    inherit: RawInherit,
    #[serde(default)]
    allow: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawInherit {
    #[default]
    All,
    AllowList,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRepo {
    #[serde(default)]
    secret: String,
    #[serde(default)]
    serialize: bool,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    #[serde(default)]
    event: String,
    #[serde(default)]
    branches: Vec<String>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    command: String,
    workdir: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn timeout_from_secs(secs: Option<u64>, context: &str) -> Result<Option<Duration>> {
    match secs {
        Some(0) => Err(invalid(format!("{}: timeout_secs must be greater than zero", context))),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

impl RawConfig {
    /// Validates the raw configuration and converts it to the typed model.
    pub(super) fn validate(self) -> Result<Config> {
        let shell = self.shell.validate()?;

        if self.repos.is_empty() {
            return Err(invalid("at least one repository must be configured"));
        }

        let mut repos = HashMap::with_capacity(self.repos.len());
        for (name, repo) in self.repos {
            if name.is_empty() {
                return Err(invalid("repository name must not be empty"));
            }
            let repo = repo
                .ok_or_else(|| invalid(format!("repository {}: configuration is empty", name)))?
                .validate(&name)?;
            repos.insert(RepoName::new(name), repo);
        }

        Ok(Config { repos, shell })
    }
}

impl RawShell {
    fn validate(self) -> Result<ShellSettings> {
        let timeout =
            timeout_from_secs(self.timeout_secs, "shell")?.unwrap_or(DEFAULT_SHELL_TIMEOUT);
        let env = match self.env.inherit {
            RawInherit::All => EnvPolicy::InheritAll,
            RawInherit::AllowList => EnvPolicy::AllowList(self.env.allow),
        };
        Ok(ShellSettings {
            timeout,
            workdir: self.workdir,
            env,
        })
    }
}

impl RawRepo {
    fn validate(self, name: &str) -> Result<RepoConfig> {
        if self.secret.is_empty() {
            return Err(invalid(format!(
                "repository {}: secret must not be empty",
                name
            )));
        }
        if self.rules.is_empty() {
            return Err(invalid(format!(
                "repository {}: at least one rule is required",
                name
            )));
        }

        let rules = self
            .rules
            .into_iter()
            .enumerate()
            .map(|(index, rule)| rule.validate(name, index))
            .collect::<Result<Vec<_>>>()?;

        Ok(RepoConfig {
            secret: self.secret,
            rules,
            serialize: self.serialize,
        })
    }
}

impl RawRule {
    fn validate(self, repo: &str, index: usize) -> Result<Rule> {
        let context = format!("repository {} rule {}", repo, index);
        if self.event.is_empty() {
            return Err(invalid(format!("{}: event must not be empty", context)));
        }
        if self.actions.is_empty() {
            return Err(invalid(format!(
                "{}: at least one action is required",
                context
            )));
        }

        let actions = self
            .actions
            .into_iter()
            .enumerate()
            .map(|(action_index, action)| {
                action.validate(&format!("{} action {}", context, action_index))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Rule {
            event: self.event,
            branches: self.branches.into_iter().collect(),
            actions,
        })
    }
}

impl RawAction {
    fn validate(self, context: &str) -> Result<Action> {
        if self.kind.is_empty() {
            return Err(invalid(format!("{}: type must not be empty", context)));
        }
        if self.kind != SHELL_ACTION {
            // Kept so the dispatcher can log and skip it.
            return Ok(Action::Unrecognized { kind: self.kind });
        }
        if self.command.is_empty() {
            return Err(invalid(format!(
                "{}: shell command must not be empty",
                context
            )));
        }

        Ok(Action::Shell(ShellAction {
            command: self.command,
            workdir: self.workdir,
            timeout: timeout_from_secs(self.timeout_secs, context)?,
        }))
    }
}
