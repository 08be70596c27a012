//! Listener configuration.
//!
//! The configuration is a YAML file mapping repository names to a secret and a
//! list of rules, plus optional shell execution settings:
//!
//! ```yaml
//! shell:
//!   timeout_secs: 300
//!   workdir: /srv/deploy
//!   env:
//!     inherit: allow_list
//!     allow: [PATH, HOME]
//! repos:
//!   "acme/app":
//!     secret: "s3cr3t"
//!     serialize: false
//!     rules:
//!       - event: push
//!         branches: [main]
//!         actions:
//!           - type: shell
//!             command: "./deploy.sh"
//! ```
//!
//! # Loading Strategy
//!
//! 1. The file is deserialized into raw structures where every field is
//!    optional, so that a missing field is reported with its location rather
//!    than as a serde error
//! 2. The raw structures are validated
//! 3. Validated data is converted into the typed model the pipeline uses
//!
//! Once loaded the configuration is immutable and shared read-only between
//! requests.

mod raw;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::actions::shell::DEFAULT_SHELL_TIMEOUT;
use crate::actions::{Dispatcher, EnvPolicy, ShellRunner};
use crate::rules::Rule;
use crate::types::RepoName;

/// Errors from loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for the expected shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The file parsed but breaks a structural requirement.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for one repository.
#[derive(Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Shared secret used to verify `X-Hub-Signature-256`. Never empty.
    pub secret: String,

    /// Rules in configuration order. Never empty.
    pub rules: Vec<Rule>,

    /// When true, deliveries for this repository run their actions one at a
    /// time instead of concurrently.
    pub serialize: bool,
}

// Hand-written so the secret never ends up in logs.
impl fmt::Debug for RepoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoConfig")
            .field("secret", &"<redacted>")
            .field("rules", &self.rules)
            .field("serialize", &self.serialize)
            .finish()
    }
}

/// Defaults applied to every shell action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSettings {
    pub timeout: Duration,
    pub workdir: Option<PathBuf>,
    pub env: EnvPolicy,
}

impl Default for ShellSettings {
    fn default() -> Self {
        ShellSettings {
            timeout: DEFAULT_SHELL_TIMEOUT,
            workdir: None,
            env: EnvPolicy::InheritAll,
        }
    }
}

/// The whole validated configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub repos: HashMap<RepoName, RepoConfig>,
    pub shell: ShellSettings,
}

impl Config {
    /// Reads, parses and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses and validates configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: raw::RawConfig = serde_yaml::from_str(text)?;
        raw.validate()
    }

    /// Looks up the configuration for a repository by its full name.
    pub fn repo(&self, name: &str) -> Option<&RepoConfig> {
        self.repos.get(name)
    }

    /// Builds the shell runner described by the `shell` section.
    pub fn shell_runner(&self) -> ShellRunner {
        let runner = ShellRunner::new()
            .with_default_timeout(self.shell.timeout)
            .with_env_policy(self.shell.env.clone());
        match &self.shell.workdir {
            Some(workdir) => runner.with_default_workdir(workdir),
            None => runner,
        }
    }

    /// Builds a dispatcher with this configuration's shell settings and
    /// per-repository serialization.
    pub fn dispatcher(&self) -> Dispatcher {
        let serialized = self
            .repos
            .iter()
            .filter(|(_, repo)| repo.serialize)
            .map(|(name, _)| name.clone());
        Dispatcher::new(self.shell_runner()).with_serialized_repos(serialized)
    }
}
