//! Newtype wrappers for identifiers that travel through the webhook pipeline.
//!
//! Keeping repository names and delivery IDs as distinct types stops a delivery
//! ID from being looked up in the repository table, and makes log fields
//! self-describing.

use std::borrow::Borrow;
use std::fmt;

/// A repository identifier in `owner/repo` form, as found at
/// `repository.full_name` in a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName(pub String);

impl RepoName {
    pub fn new(s: impl Into<String>) -> Self {
        RepoName(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RepoName {
    fn from(s: String) -> Self {
        RepoName(s)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        RepoName(s.to_string())
    }
}

// Lets `HashMap<RepoName, _>` be queried with a plain `&str`.
impl Borrow<str> for RepoName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A GitHub webhook delivery ID (`X-GitHub-Delivery`).
///
/// Only used to correlate log lines; deliveries are never deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn new(s: impl Into<String>) -> Self {
        DeliveryId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
