//! Verdict aggregation: thresholds, blocking classification and the overall
//! promotion decision.

use crate::result::{CheckResult, CheckStatus};
use crate::spec::GateSpec;
use crate::trigger::TriggerContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Overall outcome of a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Ready,
    PartialWithWarnings,
    Blocked,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Ready => "ready",
            OverallStatus::PartialWithWarnings => "partial_with_warnings",
            OverallStatus::Blocked => "blocked",
        }
    }
}

/// How a single result counts towards the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    Clean,
    Warning,
    Blocking,
}

/// Apply the environment's threshold to a result.
///
/// A metric strictly below the threshold turns the result into a `Fail`
/// whatever the checker reported. `Error` and `Skipped` results are left
/// alone, as are metrics with no configured threshold.
pub fn apply_threshold(spec: &GateSpec, result: CheckResult) -> CheckResult {
    let (metric, minimum) = match (result.metric, spec.threshold(&result.checker_name)) {
        (Some(metric), Some(minimum)) => (metric, minimum),
        _ => return result,
    };
    if matches!(result.status, CheckStatus::Error | CheckStatus::Skipped) || metric >= minimum {
        return result;
    }

    CheckResult {
        status: CheckStatus::Fail,
        detail: format!(
            "{} is below the {} threshold of {} ({})",
            metric, spec.environment_name, minimum, result.detail
        ),
        ..result
    }
}

/// Classify a (threshold-adjusted) result.
///
/// `Error` always blocks: an inconclusive check is never treated as passing.
/// A checker missing from the spec is treated as blocking.
pub fn classify(spec: &GateSpec, result: &CheckResult) -> Contribution {
    if !result.is_failure() {
        return Contribution::Clean;
    }
    if result.status == CheckStatus::Error {
        return Contribution::Blocking;
    }
    match spec.checker(&result.checker_name) {
        Some(entry) if !entry.is_effectively_blocking() => Contribution::Warning,
        _ => Contribution::Blocking,
    }
}

/// Aggregated outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub run_id: Uuid,

    pub environment_name: String,

    pub trigger: TriggerContext,

    /// Digest of the gate spec the run evaluated.
    pub spec_digest: String,

    /// Results in execution-plan order.
    pub results: Vec<CheckResult>,

    pub overall_status: OverallStatus,

    pub failed_blocking_checks: BTreeSet<String>,

    /// Non-blocking failures.
    pub warning_checks: BTreeSet<String>,

    /// Whether the pipeline deadline cut the run short.
    pub timed_out: bool,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,
}

impl Verdict {
    /// Aggregate results. Blocked beats PartialWithWarnings beats Ready.
    pub fn aggregate(
        spec: &GateSpec,
        trigger: &TriggerContext,
        results: Vec<CheckResult>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut failed_blocking_checks = BTreeSet::new();
        let mut warning_checks = BTreeSet::new();

        for result in &results {
            match classify(spec, result) {
                Contribution::Blocking => {
                    failed_blocking_checks.insert(result.checker_name.clone());
                }
                Contribution::Warning => {
                    warning_checks.insert(result.checker_name.clone());
                }
                Contribution::Clean => {}
            }
        }

        let overall_status = if !failed_blocking_checks.is_empty() {
            OverallStatus::Blocked
        } else if !warning_checks.is_empty() {
            OverallStatus::PartialWithWarnings
        } else {
            OverallStatus::Ready
        };

        Self {
            run_id: Uuid::new_v4(),
            environment_name: spec.environment_name.clone(),
            trigger: trigger.clone(),
            spec_digest: spec.digest(),
            results,
            overall_status,
            failed_blocking_checks,
            warning_checks,
            timed_out: false,
            started_at,
            duration_ms: (Utc::now() - started_at).num_milliseconds().max(0) as u64,
        }
    }

    /// Whether the change may advance to the next environment.
    pub fn is_promotable(&self) -> bool {
        self.overall_status != OverallStatus::Blocked
    }

    pub fn result(&self, checker_name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.checker_name == checker_name)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_pass()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn errored_count(&self) -> usize {
        self.count(CheckStatus::Error)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(CheckStatus::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::CheckFault;
    use crate::spec::{CheckerEntry, CheckerKind};

    fn spec() -> GateSpec {
        GateSpec::new("staging")
            .with_checker(CheckerEntry::new("lint", CheckerKind::Lint, vec!["ruff".into()]))
            .with_checker(
                CheckerEntry::new("security", CheckerKind::Security, vec!["bandit".into()])
                    .non_blocking(),
            )
            .with_checker(
                CheckerEntry::new("docs", CheckerKind::Lint, vec!["mkdocs".into()]).optional(),
            )
            .with_checker(CheckerEntry::new(
                "coverage",
                CheckerKind::Coverage,
                vec!["coverage".into()],
            ))
            .with_threshold("coverage", 70.0)
    }

    fn aggregate(results: Vec<CheckResult>) -> Verdict {
        Verdict::aggregate(&spec(), &TriggerContext::tag("v1.0.0"), results, Utc::now())
    }

    #[test]
    fn test_metric_below_threshold_fails_despite_pass() {
        let result = CheckResult::pass("coverage", "65.0% covered").with_metric(65.0);
        let adjusted = apply_threshold(&spec(), result);
        assert_eq!(adjusted.status, CheckStatus::Fail);
        assert!(adjusted.detail.contains("70"));
        assert_eq!(adjusted.metric, Some(65.0));
    }

    #[test]
    fn test_metric_at_threshold_passes() {
        let result = CheckResult::pass("coverage", "70.0% covered").with_metric(70.0);
        assert_eq!(apply_threshold(&spec(), result).status, CheckStatus::Pass);
    }

    #[test]
    fn test_metric_without_threshold_is_informational() {
        let result = CheckResult::pass("lint", "ok").with_metric(1.0);
        assert_eq!(apply_threshold(&spec(), result).status, CheckStatus::Pass);
    }

    #[test]
    fn test_threshold_does_not_mask_errors() {
        let result = CheckResult::error("coverage", &CheckFault::Timeout { secs: 5 }).with_metric(10.0);
        assert_eq!(apply_threshold(&spec(), result).status, CheckStatus::Error);
    }

    #[test]
    fn test_all_pass_is_ready() {
        let verdict = aggregate(vec![
            CheckResult::pass("lint", "ok"),
            CheckResult::pass("security", "ok"),
        ]);
        assert_eq!(verdict.overall_status, OverallStatus::Ready);
        assert!(verdict.is_promotable());
        assert_eq!(verdict.passed_count(), 2);
    }

    #[test]
    fn test_non_blocking_fail_is_partial() {
        let verdict = aggregate(vec![
            CheckResult::pass("lint", "ok"),
            CheckResult::fail("security", "2 issues"),
            CheckResult::fail("docs", "broken link"),
        ]);
        assert_eq!(verdict.overall_status, OverallStatus::PartialWithWarnings);
        assert!(verdict.failed_blocking_checks.is_empty());
        assert_eq!(verdict.warning_checks.len(), 2);
        assert!(verdict.is_promotable());
    }

    #[test]
    fn test_blocking_fail_wins() {
        let verdict = aggregate(vec![
            CheckResult::fail("lint", "E501"),
            CheckResult::fail("security", "2 issues"),
        ]);
        assert_eq!(verdict.overall_status, OverallStatus::Blocked);
        assert!(verdict.failed_blocking_checks.contains("lint"));
        assert!(verdict.warning_checks.contains("security"));
        assert!(!verdict.is_promotable());
    }

    #[test]
    fn test_error_on_non_blocking_checker_blocks() {
        let fault = CheckFault::ToolMissing {
            tool: "bandit".to_string(),
        };
        let verdict = aggregate(vec![CheckResult::error("security", &fault)]);
        assert_eq!(verdict.overall_status, OverallStatus::Blocked);
        assert!(verdict.failed_blocking_checks.contains("security"));
        assert_eq!(verdict.errored_count(), 1);
    }

    #[test]
    fn test_classify_contributions() {
        let spec = spec();
        assert_eq!(classify(&spec, &CheckResult::pass("lint", "ok")), Contribution::Clean);
        assert_eq!(classify(&spec, &CheckResult::fail("lint", "E501")), Contribution::Blocking);
        assert_eq!(
            classify(&spec, &CheckResult::fail("security", "B101")),
            Contribution::Warning
        );
        assert_eq!(
            classify(&spec, &CheckResult::error("docs", &CheckFault::NotRegistered)),
            Contribution::Blocking
        );
        assert_eq!(
            classify(&spec, &CheckResult::fail("unknown", "?")),
            Contribution::Blocking
        );
    }

    #[test]
    fn test_skipped_is_clean() {
        let verdict = aggregate(vec![CheckResult::skipped("lint", "not run")]);
        assert_eq!(verdict.overall_status, OverallStatus::Ready);
        assert_eq!(verdict.skipped_count(), 1);
    }

    #[test]
    fn test_verdict_carries_spec_digest() {
        let verdict = aggregate(Vec::new());
        assert_eq!(verdict.spec_digest, spec().digest());
        assert_eq!(verdict.environment_name, "staging");
    }
}
