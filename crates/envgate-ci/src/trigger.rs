//! Trigger context: the ref and event that started a pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of git ref that triggered the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    Branch,
    Tag,
}

/// Event that triggered the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

/// Immutable description of what triggered a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerContext {
    /// Short ref name (`main`, `v1.2.3`).
    #[serde(rename = "ref")]
    pub ref_name: String,

    pub ref_type: RefType,

    pub event: EventKind,
}

impl TriggerContext {
    pub fn new(ref_name: impl Into<String>, ref_type: RefType, event: EventKind) -> Self {
        Self {
            ref_name: ref_name.into(),
            ref_type,
            event,
        }
    }

    pub fn branch(name: impl Into<String>, event: EventKind) -> Self {
        Self::new(name, RefType::Branch, event)
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self::new(name, RefType::Tag, EventKind::Push)
    }

    /// Build a context from a fully qualified git ref.
    ///
    /// `refs/tags/*` becomes a tag push, `refs/heads/*` a branch event, and
    /// `refs/pull/<n>/merge` a pull request against an unnamed branch. Any
    /// other input is taken as a short branch name.
    pub fn from_git_ref(git_ref: &str, event: EventKind) -> Self {
        if let Some(tag) = git_ref.strip_prefix("refs/tags/") {
            return Self::new(tag, RefType::Tag, event);
        }
        if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
            return Self::branch(branch, event);
        }
        if git_ref.starts_with("refs/pull/") {
            return Self::branch(git_ref, EventKind::PullRequest);
        }
        Self::branch(git_ref, event)
    }

    /// The tag name, if this run was triggered by a tag.
    pub fn tag_name(&self) -> Option<&str> {
        match self.ref_type {
            RefType::Tag => Some(&self.ref_name),
            RefType::Branch => None,
        }
    }
}

impl fmt::Display for TriggerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.ref_type {
            RefType::Branch => "branch",
            RefType::Tag => "tag",
        };
        write!(f, "{} '{}' ({})", kind, self.ref_name, self.event.as_str())
    }
}
