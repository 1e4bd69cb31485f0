//! Check results and check faults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single checker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Error => "error",
            CheckStatus::Skipped => "skipped",
        }
    }
}

/// An environment fault that kept a checker from reaching a conclusion.
///
/// Faults always surface as [`CheckStatus::Error`], which is blocking.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckFault {
    #[error("tool '{tool}' is not available")]
    ToolMissing { tool: String },

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("pipeline timed out before the check completed")]
    PipelineTimeout,

    #[error("checker panicked: {0}")]
    Panicked(String),

    #[error("no checker registered under this name")]
    NotRegistered,

    #[error("inconclusive: {0}")]
    Inconclusive(String),
}

/// Result of a single checker run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub checker_name: String,

    pub status: CheckStatus,

    /// Human-readable explanation.
    pub detail: String,

    /// Numeric measurement such as a coverage percentage.
    pub metric: Option<f64>,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl CheckResult {
    fn new(checker_name: &str, status: CheckStatus, detail: String) -> Self {
        let now = Utc::now();
        Self {
            checker_name: checker_name.to_string(),
            status,
            detail,
            metric: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }

    pub fn pass(checker_name: &str, detail: impl Into<String>) -> Self {
        Self::new(checker_name, CheckStatus::Pass, detail.into())
    }

    pub fn fail(checker_name: &str, detail: impl Into<String>) -> Self {
        Self::new(checker_name, CheckStatus::Fail, detail.into())
    }

    pub fn error(checker_name: &str, fault: &CheckFault) -> Self {
        Self::new(checker_name, CheckStatus::Error, fault.to_string())
    }

    pub fn skipped(checker_name: &str, detail: impl Into<String>) -> Self {
        Self::new(checker_name, CheckStatus::Skipped, detail.into())
    }

    pub fn with_metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Stamp the execution window.
    pub fn timed(mut self, started_at: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.finished_at = finished_at;
        self.duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        self
    }

    pub fn is_pass(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    /// Fail or Error.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, CheckStatus::Fail | CheckStatus::Error)
    }
}
