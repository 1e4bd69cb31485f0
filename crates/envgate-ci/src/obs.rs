//! Structured observability hooks for the gate pipeline lifecycle.
//!
//! Every hook emits a `tracing` event with an `event = "..."` field so log
//! aggregation can filter on lifecycle stages.

use crate::gate::Verdict;
use crate::result::CheckResult;
use tracing::{info, warn};

/// Span covering one pipeline run.
///
/// ```ignore
/// runner.run_inner(..).instrument(pipeline_span("staging", &trigger)).await
/// ```
pub fn pipeline_span(environment: &str, trigger: &str) -> tracing::Span {
    tracing::info_span!("envgate.pipeline", environment = %environment, trigger = %trigger)
}

pub fn emit_profile_resolved(profile: &str, trigger: &str) {
    info!(event = "profile.resolved", profile = %profile, trigger = %trigger);
}

pub fn emit_pipeline_started(environment: &str, groups: usize, checkers: usize) {
    info!(
        event = "pipeline.started",
        environment = %environment,
        groups = groups,
        checkers = checkers,
    );
}

pub fn emit_group_started(index: usize, members: &[&str]) {
    info!(event = "group.started", group = index, members = ?members);
}

pub fn emit_check_finished(result: &CheckResult) {
    info!(
        event = "check.finished",
        checker = %result.checker_name,
        status = result.status.as_str(),
        duration_ms = result.duration_ms,
        metric = ?result.metric,
    );
}

/// Remaining groups were not started because of a blocking failure.
pub fn emit_groups_skipped(from_group: usize, blocking: &[&str]) {
    warn!(event = "pipeline.fail_fast", from_group = from_group, blocking = ?blocking);
}

pub fn emit_pipeline_timeout(group: usize, outstanding: &[&str]) {
    warn!(event = "pipeline.timeout", group = group, outstanding = ?outstanding);
}

pub fn emit_verdict(verdict: &Verdict) {
    info!(
        event = "verdict",
        environment = %verdict.environment_name,
        status = verdict.overall_status.as_str(),
        passed = verdict.passed_count(),
        failed = verdict.failed_count(),
        errored = verdict.errored_count(),
        skipped = verdict.skipped_count(),
        duration_ms = verdict.duration_ms,
    );
}
