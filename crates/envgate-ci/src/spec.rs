//! Gate specifications: which checkers run for an environment, in what order,
//! and against which thresholds.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// Default per-checker timeout in seconds.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 600;

/// Closed set of checker kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckerKind {
    Lint,
    Test,
    Coverage,
    Security,
    VersionFormat,
}

impl CheckerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckerKind::Lint => "lint",
            CheckerKind::Test => "test",
            CheckerKind::Coverage => "coverage",
            CheckerKind::Security => "security",
            CheckerKind::VersionFormat => "version_format",
        }
    }

    /// Whether this kind shells out to an external tool.
    pub fn needs_command(&self) -> bool {
        !matches!(self, CheckerKind::VersionFormat)
    }
}

impl std::str::FromStr for CheckerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lint" => Ok(CheckerKind::Lint),
            "test" => Ok(CheckerKind::Test),
            "coverage" => Ok(CheckerKind::Coverage),
            "security" => Ok(CheckerKind::Security),
            "version_format" => Ok(CheckerKind::VersionFormat),
            other => Err(format!("unknown checker kind '{}'", other)),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    DEFAULT_CHECK_TIMEOUT_SECS
}

/// One checker declared in a gate spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckerEntry {
    pub name: String,

    pub kind: CheckerKind,

    /// Command to execute (first element is the executable).
    #[serde(default)]
    pub command: Vec<String>,

    /// A non-required checker can only ever warn.
    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default = "default_true")]
    pub blocking: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Regex with one capture group that extracts the metric from stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_pattern: Option<String>,
}

impl CheckerEntry {
    pub fn new(name: impl Into<String>, kind: CheckerKind, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            command,
            required: true,
            blocking: true,
            timeout_secs: DEFAULT_CHECK_TIMEOUT_SECS,
            metric_pattern: None,
        }
    }

    pub fn version_format(name: impl Into<String>) -> Self {
        Self::new(name, CheckerKind::VersionFormat, Vec::new())
    }

    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Whether a `Fail` from this checker blocks promotion.
    ///
    /// Version-format failures always block. `Error` results block
    /// regardless of this flag.
    pub fn is_effectively_blocking(&self) -> bool {
        self.kind == CheckerKind::VersionFormat || (self.required && self.blocking)
    }
}

/// Declarative description of the gates for one environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GateSpec {
    pub environment_name: String,

    pub checkers: Vec<CheckerEntry>,

    /// Checker name to minimum metric value.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    /// Sets of checker names that may run concurrently, in execution order.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl GateSpec {
    pub fn new(environment_name: impl Into<String>) -> Self {
        Self {
            environment_name: environment_name.into(),
            ..Default::default()
        }
    }

    pub fn with_checker(mut self, entry: CheckerEntry) -> Self {
        self.checkers.push(entry);
        self
    }

    pub fn with_threshold(mut self, checker: impl Into<String>, minimum: f64) -> Self {
        self.thresholds.insert(checker.into(), minimum);
        self
    }

    pub fn with_group<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.parallel_groups
            .push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pipeline_timeout(mut self, secs: u64) -> Self {
        self.pipeline_timeout_secs = Some(secs);
        self
    }

    pub fn checker(&self, name: &str) -> Option<&CheckerEntry> {
        self.checkers.iter().find(|c| c.name == name)
    }

    pub fn threshold(&self, checker_name: &str) -> Option<f64> {
        self.thresholds.get(checker_name).copied()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSpec {
            environment: self.environment_name.clone(),
            reason,
        };

        if self.environment_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "environment name must not be empty".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for entry in &self.checkers {
            if entry.name.trim().is_empty() {
                return Err(invalid("checker name must not be empty".to_string()));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(invalid(format!("duplicate checker '{}'", entry.name)));
            }
            if entry.kind.needs_command() && entry.command.is_empty() {
                return Err(invalid(format!(
                    "checker '{}' ({}) has an empty command",
                    entry.name,
                    entry.kind.as_str()
                )));
            }
            if let Some(pattern) = &entry.metric_pattern {
                regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
            }
        }

        let mut grouped = HashSet::new();
        for group in &self.parallel_groups {
            for name in group {
                if !names.contains(name.as_str()) {
                    return Err(invalid(format!(
                        "parallel group references undeclared checker '{}'",
                        name
                    )));
                }
                if !grouped.insert(name.as_str()) {
                    return Err(invalid(format!(
                        "checker '{}' appears in more than one parallel group",
                        name
                    )));
                }
            }
        }

        for (name, minimum) in &self.thresholds {
            if !names.contains(name.as_str()) {
                return Err(invalid(format!(
                    "threshold set for undeclared checker '{}'",
                    name
                )));
            }
            if !minimum.is_finite() {
                return Err(invalid(format!("threshold for '{}' is not finite", name)));
            }
        }

        if self.max_concurrency == Some(0) {
            return Err(invalid("max_concurrency must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Ordered groups of checkers to execute.
    ///
    /// Version-format checkers always form the leading group. Declared
    /// parallel groups follow in order, then every ungrouped checker as its
    /// own group in declaration order.
    pub fn execution_plan(&self) -> Vec<Vec<&CheckerEntry>> {
        let mut plan: Vec<Vec<&CheckerEntry>> = Vec::new();

        let version_checks: Vec<&CheckerEntry> = self
            .checkers
            .iter()
            .filter(|c| c.kind == CheckerKind::VersionFormat)
            .collect();
        if !version_checks.is_empty() {
            plan.push(version_checks);
        }

        let mut grouped = HashSet::new();
        for group in &self.parallel_groups {
            let members: Vec<&CheckerEntry> = group
                .iter()
                .filter_map(|name| self.checker(name))
                .filter(|c| c.kind != CheckerKind::VersionFormat)
                .collect();
            grouped.extend(group.iter().map(String::as_str));
            if !members.is_empty() {
                plan.push(members);
            }
        }

        for entry in &self.checkers {
            if entry.kind != CheckerKind::VersionFormat && !grouped.contains(entry.name.as_str()) {
                plan.push(vec![entry]);
            }
        }

        plan
    }

    /// Deterministic digest of the spec, used to tie a verdict to its config.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.environment_name.as_bytes());
        hasher.update(b"\0");
        for entry in &self.checkers {
            hasher.update(entry.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(entry.kind.as_str().as_bytes());
            hasher.update(b"\0");
            for arg in &entry.command {
                hasher.update(arg.as_bytes());
                hasher.update(b"\x1f");
            }
            hasher.update([entry.required as u8, entry.blocking as u8]);
            hasher.update(entry.timeout_secs.to_le_bytes());
        }
        for (name, minimum) in &self.thresholds {
            hasher.update(name.as_bytes());
            hasher.update(minimum.to_le_bytes());
        }
        for group in &self.parallel_groups {
            for name in group {
                hasher.update(name.as_bytes());
                hasher.update(b"\x1f");
            }
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}
