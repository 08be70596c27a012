//! Per-repository rule matching.
//!
//! A rule pairs an event filter (event type plus an optional branch set) with
//! an ordered action list. Matching is a filter, not a selection: every rule
//! whose filter accepts the delivery fires, in configuration order. A push to
//! `main` can therefore trigger both a deploy rule and a notify rule.
//!
//! Comparison is exact string equality. There is no glob or regex support for
//! branches, and no event hierarchy (`push` does not match `push.tag`).

use std::collections::BTreeSet;

use crate::actions::Action;

/// An operator-defined rule: which deliveries it accepts and what it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Event type as sent in `X-GitHub-Event` (e.g. "push").
    pub event: String,

    /// Branches this rule is restricted to. Empty means any branch.
    pub branches: BTreeSet<String>,

    /// Actions to run, in order.
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(event: impl Into<String>) -> Self {
        Rule {
            event: event.into(),
            branches: BTreeSet::new(),
            actions: Vec::new(),
        }
    }

    /// Restricts the rule to the given branches.
    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    /// Appends an action to the rule's action list.
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Returns true if this rule accepts a delivery of `event` on `branch`.
    ///
    /// `branch` is empty when the payload carried no `ref`; such a delivery only
    /// matches rules with no branch restriction.
    pub fn matches(&self, event: &str, branch: &str) -> bool {
        self.event == event && (self.branches.is_empty() || self.branches.contains(branch))
    }
}

/// Returns every rule that matches `(event, branch)`, preserving order.
pub fn matching_rules<'a>(rules: &'a [Rule], event: &str, branch: &str) -> Vec<&'a Rule> {
    rules
        .iter()
        .filter(|rule| rule.matches(event, branch))
        .collect()
}
