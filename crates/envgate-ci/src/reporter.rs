//! Verdict reporter: exit codes, human-readable summaries and
//! machine-readable records. Rendering never mutates the verdict.

use crate::gate::{OverallStatus, Verdict};
use crate::result::{CheckResult, CheckStatus};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Exit code for a verdict: 0 when promotable, 1 when blocked.
pub fn exit_code(verdict: &Verdict) -> i32 {
    match verdict.overall_status {
        OverallStatus::Ready | OverallStatus::PartialWithWarnings => 0,
        OverallStatus::Blocked => 1,
    }
}

/// Output formats understood by [`render`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    KeyValue,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "kv" | "key_value" | "key-value" => Ok(ReportFormat::KeyValue),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Machine-readable verdict record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerdictRecord<'a> {
    pub environment: &'a str,
    pub status: OverallStatus,
    pub ready: bool,
    pub exit_code: i32,
    #[serde(flatten)]
    pub verdict: &'a Verdict,
}

impl<'a> VerdictRecord<'a> {
    pub fn new(verdict: &'a Verdict) -> Self {
        Self {
            environment: &verdict.environment_name,
            status: verdict.overall_status,
            ready: verdict.is_promotable(),
            exit_code: exit_code(verdict),
            verdict,
        }
    }
}

fn status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Error => "ERROR",
        CheckStatus::Skipped => "SKIP",
    }
}

fn headline(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Ready => "READY",
        OverallStatus::PartialWithWarnings => "READY WITH WARNINGS",
        OverallStatus::Blocked => "BLOCKED",
    }
}

fn result_line(result: &CheckResult) -> String {
    let mut line = format!(
        "  [{}] {} ({}ms)",
        status_label(result.status),
        result.checker_name,
        result.duration_ms
    );
    if let Some(metric) = result.metric {
        let _ = write!(line, " metric={}", metric);
    }
    if !result.detail.is_empty() {
        let mut detail = result.detail.lines();
        if let Some(first) = detail.next() {
            let _ = write!(line, ": {}", first);
        }
        for rest in detail {
            let _ = write!(line, "\n      {}", rest);
        }
    }
    line
}

/// Ordered human-readable summary.
pub fn render_summary(verdict: &Verdict) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Environment: {} ({})",
        verdict.environment_name, verdict.trigger
    );
    let _ = writeln!(out, "Status: {}", headline(verdict.overall_status));
    let _ = writeln!(out, "Duration: {}ms", verdict.duration_ms);
    out.push('\n');

    for result in &verdict.results {
        let _ = writeln!(out, "{}", result_line(result));
    }

    out.push('\n');
    let _ = writeln!(
        out,
        "Summary: {}/{} checks passed, {} failed, {} errored, {} skipped",
        verdict.passed_count(),
        verdict.results.len(),
        verdict.failed_count(),
        verdict.errored_count(),
        verdict.skipped_count()
    );
    if verdict.timed_out {
        let _ = writeln!(out, "Pipeline timed out.");
    }
    if !verdict.failed_blocking_checks.is_empty() {
        let names: Vec<&str> = verdict.failed_blocking_checks.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Blocking: {}", names.join(", "));
    }
    if !verdict.warning_checks.is_empty() {
        let names: Vec<&str> = verdict.warning_checks.iter().map(String::as_str).collect();
        let _ = writeln!(out, "Warnings: {}", names.join(", "));
    }
    out
}

/// Pretty JSON record.
pub fn render_json(verdict: &Verdict) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&VerdictRecord::new(verdict))
}

/// `key=value` lines for CI step outputs. Values are single-line.
pub fn render_key_value(verdict: &Verdict) -> String {
    let join = |set: &std::collections::BTreeSet<String>| {
        set.iter().map(String::as_str).collect::<Vec<_>>().join(",")
    };

    let mut out = String::new();
    let _ = writeln!(out, "environment={}", verdict.environment_name);
    let _ = writeln!(out, "status={}", verdict.overall_status.as_str());
    let _ = writeln!(out, "ready={}", verdict.is_promotable());
    let _ = writeln!(out, "exit_code={}", exit_code(verdict));
    let _ = writeln!(out, "run_id={}", verdict.run_id);
    let _ = writeln!(out, "failed_blocking={}", join(&verdict.failed_blocking_checks));
    let _ = writeln!(out, "warnings={}", join(&verdict.warning_checks));
    for result in &verdict.results {
        let _ = writeln!(
            out,
            "check.{}.status={}",
            result.checker_name,
            result.status.as_str()
        );
        if let Some(metric) = result.metric {
            let _ = writeln!(out, "check.{}.metric={}", result.checker_name, metric);
        }
    }
    out
}

/// Render in the requested format.
pub fn render(verdict: &Verdict, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Text => Ok(render_summary(verdict)),
        ReportFormat::Json => render_json(verdict),
        ReportFormat::KeyValue => Ok(render_key_value(verdict)),
    }
}
