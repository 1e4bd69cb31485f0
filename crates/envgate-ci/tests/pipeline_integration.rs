//! Integration tests for the pipeline runner against the sample gate config.

use async_trait::async_trait;
use envgate_ci::{
    exit_code, BuiltinChecker, CheckContext, CheckResult, CheckStatus, Checker, CheckerEntry,
    CheckerKind, CheckerRegistry, EnvironmentProfile, EventKind, GateConfig, GateSpec,
    OverallStatus, PipelineRunner, ProfileResolver, RunOptions, TriggerContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_CONFIG: &str = include_str!("../../../gates.yaml");

/// Checker that sleeps, then reports a fixed outcome and counts its runs.
struct Scripted {
    name: String,
    status: CheckStatus,
    metric: Option<f64>,
    delay: Duration,
    runs: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(name: &str, status: CheckStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            metric: None,
            delay: Duration::from_millis(5),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn metric(mut self, metric: f64) -> Self {
        self.metric = Some(metric);
        self
    }

    fn delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }
}

#[async_trait]
impl Checker for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &CheckContext) -> CheckResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = match self.status {
            CheckStatus::Pass => CheckResult::pass(&self.name, "ok"),
            CheckStatus::Fail => CheckResult::fail(&self.name, "scripted failure"),
            CheckStatus::Error => CheckResult::error(
                &self.name,
                &envgate_ci::CheckFault::Io("scripted fault".to_string()),
            ),
            CheckStatus::Skipped => CheckResult::skipped(&self.name, "scripted skip"),
        };
        match self.metric {
            Some(metric) => result.with_metric(metric),
            None => result,
        }
    }
}

fn resolver() -> ProfileResolver {
    GateConfig::from_yaml_str(SAMPLE_CONFIG)
        .expect("sample config parses")
        .into_resolver()
        .expect("sample config resolves")
}

fn profile<'a>(resolver: &'a ProfileResolver, trigger: &TriggerContext) -> &'a EnvironmentProfile {
    resolver.resolve(trigger).expect("profile resolves")
}

/// Registry with a passing scripted checker for every declared checker.
fn passing_registry(spec: &GateSpec) -> CheckerRegistry {
    let mut registry = CheckerRegistry::new();
    for entry in &spec.checkers {
        registry.insert(entry.name.clone(), Arc::new(Scripted::new(&entry.name, CheckStatus::Pass)));
    }
    registry
}

/// Scenario A: CI profile, every checker passes.
#[tokio::test]
async fn test_ci_all_pass_is_ready() {
    let resolver = resolver();
    let trigger = TriggerContext::branch("feature/login", EventKind::PullRequest);
    let profile = profile(&resolver, &trigger);
    assert_eq!(profile.name, "ci");

    let spec = profile.gate_spec.clone();
    let registry = passing_registry(&spec);
    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    assert_eq!(verdict.overall_status, OverallStatus::Ready);
    assert_eq!(exit_code(&verdict), 0);
    assert_eq!(verdict.passed_count(), 4);
    assert!(verdict.failed_blocking_checks.is_empty());
}

/// Scenario B: staging coverage of 65 against a threshold of 70.
#[tokio::test]
async fn test_staging_coverage_below_threshold_blocks() {
    let resolver = resolver();
    let trigger = TriggerContext::branch("main", EventKind::Push);
    let profile = profile(&resolver, &trigger);
    assert_eq!(profile.name, "staging");

    let spec = profile.gate_spec.clone();
    let registry = passing_registry(&spec).with(
        "coverage",
        Arc::new(Scripted::new("coverage", CheckStatus::Pass).metric(65.0)),
    );
    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    let coverage = verdict.result("coverage").expect("coverage result");
    assert_eq!(coverage.status, CheckStatus::Fail);
    assert_eq!(coverage.metric, Some(65.0));
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert!(verdict.failed_blocking_checks.contains("coverage"));
    assert_eq!(exit_code(&verdict), 1);
}

/// The same coverage figure is informational where no threshold is set.
#[tokio::test]
async fn test_ci_coverage_without_threshold_is_informational() {
    let resolver = resolver();
    let trigger = TriggerContext::branch("feature/x", EventKind::PullRequest);
    let spec = profile(&resolver, &trigger).gate_spec.clone();
    let registry = passing_registry(&spec).with(
        "coverage",
        Arc::new(Scripted::new("coverage", CheckStatus::Pass).metric(65.0)),
    );
    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    assert_eq!(verdict.result("coverage").map(|r| r.status), Some(CheckStatus::Pass));
    assert_eq!(verdict.overall_status, OverallStatus::Ready);
}

/// Scenario C: an invalid release tag blocks before anything else runs.
#[tokio::test]
async fn test_production_invalid_tag_blocks_and_halts() {
    let resolver = resolver();
    let trigger = TriggerContext::tag("v1.2");
    let profile = profile(&resolver, &trigger);
    assert_eq!(profile.name, "production");

    let spec = profile.gate_spec.clone();
    let lint = Scripted::new("lint", CheckStatus::Pass);
    let lint_runs = Arc::clone(&lint.runs);
    let test = Scripted::new("test", CheckStatus::Pass);
    let test_runs = Arc::clone(&test.runs);

    let registry = CheckerRegistry::from_spec(&spec)
        .with("lint", Arc::new(lint))
        .with("test", Arc::new(test));
    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    assert_eq!(verdict.results[0].checker_name, "version");
    assert_eq!(verdict.results[0].status, CheckStatus::Fail);
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert!(verdict.failed_blocking_checks.contains("version"));
    assert_eq!(exit_code(&verdict), 1);

    assert_eq!(lint_runs.load(Ordering::SeqCst), 0);
    assert_eq!(test_runs.load(Ordering::SeqCst), 0);
    assert!(verdict.results[1..]
        .iter()
        .all(|r| r.status == CheckStatus::Skipped));
    assert_eq!(verdict.skipped_count(), 5);
}

/// Scenario D: a valid release tag with passing checks and 85% coverage.
#[tokio::test]
async fn test_production_valid_release_is_ready() {
    let resolver = resolver();
    let trigger = TriggerContext::tag("v1.2.3");
    let spec = profile(&resolver, &trigger).gate_spec.clone();

    let mut registry = passing_registry(&spec).with(
        "coverage",
        Arc::new(Scripted::new("coverage", CheckStatus::Pass).metric(85.0)),
    );
    // the real version-format checker, no tools involved
    let version = spec.checker("version").expect("version checker");
    registry.insert("version", Arc::new(BuiltinChecker::from_entry(version)));

    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    assert_eq!(verdict.overall_status, OverallStatus::Ready);
    assert_eq!(exit_code(&verdict), 0);
    assert_eq!(verdict.passed_count(), 6);
    assert_eq!(verdict.result("coverage").and_then(|r| r.metric), Some(85.0));
}

/// Scenario E: an unavailable tool is an error, and errors always block.
#[tokio::test]
async fn test_missing_tool_blocks_even_when_non_blocking() {
    let resolver = resolver();
    let trigger = TriggerContext::branch("main", EventKind::Push);
    let spec = profile(&resolver, &trigger).gate_spec.clone();

    let security = spec.checker("security").expect("security checker");
    assert!(!security.blocking);
    let mut missing = security.clone();
    missing.command = vec!["envgate-no-such-security-scanner".to_string()];

    let registry = passing_registry(&spec)
        .with("security", Arc::new(BuiltinChecker::from_entry(&missing)));
    let verdict = PipelineRunner::new(spec, registry).run(&trigger, ".").await;

    let result = verdict.result("security").expect("security result");
    assert_eq!(result.status, CheckStatus::Error);
    assert!(result.detail.contains("not available"));
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert!(verdict.failed_blocking_checks.contains("security"));
    assert_eq!(exit_code(&verdict), 1);
}

fn three_group_spec() -> GateSpec {
    let lint = |name: &str| CheckerEntry::new(name, CheckerKind::Lint, vec!["true".to_string()]);
    GateSpec::new("ci")
        .with_checker(lint("a"))
        .with_checker(lint("b"))
        .with_checker(lint("c"))
        .with_checker(lint("d").non_blocking())
        .with_group(["a", "b"])
        .with_group(["c"])
}

/// Every checker of a group finishes before the next group starts.
#[tokio::test]
async fn test_groups_are_sequential() {
    let spec = three_group_spec();
    let registry = CheckerRegistry::new()
        .with("a", Arc::new(Scripted::new("a", CheckStatus::Pass).delay_ms(80)))
        .with("b", Arc::new(Scripted::new("b", CheckStatus::Pass).delay_ms(20)))
        .with("c", Arc::new(Scripted::new("c", CheckStatus::Pass).delay_ms(10)))
        .with("d", Arc::new(Scripted::new("d", CheckStatus::Pass)));

    let verdict = PipelineRunner::new(spec, registry)
        .run(&TriggerContext::branch("dev", EventKind::Push), ".")
        .await;

    let names: Vec<&str> = verdict.results.iter().map(|r| r.checker_name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);

    let a = verdict.result("a").expect("a");
    let b = verdict.result("b").expect("b");
    let c = verdict.result("c").expect("c");
    let d = verdict.result("d").expect("d");
    let first_group_done = a.finished_at.max(b.finished_at);
    assert!(first_group_done <= c.started_at);
    assert!(c.finished_at <= d.started_at);

    // a and b overlapped
    assert!(b.started_at < a.finished_at);
    assert!(a.started_at < b.finished_at);
}

/// With a concurrency bound of one, group members run one after another.
#[tokio::test]
async fn test_max_concurrency_serializes_group() {
    let spec = three_group_spec();
    let registry = CheckerRegistry::new()
        .with("a", Arc::new(Scripted::new("a", CheckStatus::Pass).delay_ms(40)))
        .with("b", Arc::new(Scripted::new("b", CheckStatus::Pass).delay_ms(40)))
        .with("c", Arc::new(Scripted::new("c", CheckStatus::Pass)))
        .with("d", Arc::new(Scripted::new("d", CheckStatus::Pass)));

    let verdict = PipelineRunner::new(spec, registry)
        .with_options(RunOptions {
            pipeline_timeout: None,
            max_concurrency: Some(1),
        })
        .run(&TriggerContext::branch("dev", EventKind::Push), ".")
        .await;

    let a = verdict.result("a").expect("a");
    let b = verdict.result("b").expect("b");
    assert!(a.finished_at <= b.started_at || b.finished_at <= a.started_at);
    assert_eq!(verdict.overall_status, OverallStatus::Ready);
}

/// A blocking failure lets its group finish but skips later groups.
#[tokio::test(start_paused = true)]
async fn test_fail_fast_keeps_concurrent_results() {
    let spec = three_group_spec();
    let c = Scripted::new("c", CheckStatus::Pass);
    let c_runs = Arc::clone(&c.runs);
    let registry = CheckerRegistry::new()
        .with("a", Arc::new(Scripted::new("a", CheckStatus::Fail).delay_ms(5)))
        .with("b", Arc::new(Scripted::new("b", CheckStatus::Pass).delay_ms(60)))
        .with("c", Arc::new(c))
        .with("d", Arc::new(Scripted::new("d", CheckStatus::Pass)));

    let verdict = PipelineRunner::new(spec, registry)
        .run(&TriggerContext::branch("dev", EventKind::Push), ".")
        .await;

    assert_eq!(verdict.result("a").map(|r| r.status), Some(CheckStatus::Fail));
    assert_eq!(verdict.result("b").map(|r| r.status), Some(CheckStatus::Pass));
    let skipped = verdict.result("c").expect("c");
    assert_eq!(skipped.status, CheckStatus::Skipped);
    assert!(skipped.detail.contains("blocked by a"));
    assert_eq!(c_runs.load(Ordering::SeqCst), 0);
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
}

/// Non-blocking failures do not halt later groups.
#[tokio::test]
async fn test_non_blocking_failure_continues() {
    let spec = three_group_spec().with_group(["d"]);
    let registry = CheckerRegistry::new()
        .with("a", Arc::new(Scripted::new("a", CheckStatus::Pass)))
        .with("b", Arc::new(Scripted::new("b", CheckStatus::Pass)))
        .with("c", Arc::new(Scripted::new("c", CheckStatus::Pass)))
        .with("d", Arc::new(Scripted::new("d", CheckStatus::Fail)));

    let verdict = PipelineRunner::new(spec, registry)
        .run(&TriggerContext::branch("dev", EventKind::Push), ".")
        .await;

    assert_eq!(verdict.overall_status, OverallStatus::PartialWithWarnings);
    assert!(verdict.warning_checks.contains("d"));
    assert_eq!(exit_code(&verdict), 0);
}

/// The pipeline deadline converts outstanding checkers into errors.
#[tokio::test(start_paused = true)]
async fn test_pipeline_timeout_marks_outstanding_errors() {
    let spec = three_group_spec();
    let registry = CheckerRegistry::new()
        .with("a", Arc::new(Scripted::new("a", CheckStatus::Pass).delay_ms(5)))
        .with("b", Arc::new(Scripted::new("b", CheckStatus::Pass).delay_ms(10_000)))
        .with("c", Arc::new(Scripted::new("c", CheckStatus::Pass)))
        .with("d", Arc::new(Scripted::new("d", CheckStatus::Pass)));

    let started = tokio::time::Instant::now();
    let verdict = PipelineRunner::new(spec, registry)
        .with_options(RunOptions {
            pipeline_timeout: Some(Duration::from_millis(150)),
            max_concurrency: None,
        })
        .run(&TriggerContext::branch("dev", EventKind::Push), ".")
        .await;
    // the deadline, not b's ten second sleep, ended the run
    assert!(started.elapsed() < Duration::from_secs(1));

    assert!(verdict.timed_out);
    assert_eq!(verdict.result("a").map(|r| r.status), Some(CheckStatus::Pass));
    let b = verdict.result("b").expect("b");
    assert_eq!(b.status, CheckStatus::Error);
    assert!(b.detail.contains("pipeline timed out"));
    assert_eq!(verdict.result("c").map(|r| r.status), Some(CheckStatus::Skipped));
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
    assert_eq!(exit_code(&verdict), 1);
}

/// Real tools end to end through the built-in registry.
#[tokio::test]
async fn test_builtin_commands_end_to_end() {
    let sh = |script: &str| vec!["sh".to_string(), "-c".to_string(), script.to_string()];
    let spec = GateSpec::new("staging")
        .with_checker(CheckerEntry::new("lint", CheckerKind::Lint, sh("exit 0")))
        .with_checker(CheckerEntry::new(
            "coverage",
            CheckerKind::Coverage,
            sh("echo 'TOTAL  200  30  72%'"),
        ))
        .with_threshold("coverage", 80.0);
    let registry = CheckerRegistry::from_spec(&spec);
    let verdict = PipelineRunner::new(spec, registry)
        .run(&TriggerContext::branch("main", EventKind::Push), ".")
        .await;

    assert_eq!(verdict.result("lint").map(|r| r.status), Some(CheckStatus::Pass));
    let coverage = verdict.result("coverage").expect("coverage");
    assert_eq!(coverage.status, CheckStatus::Fail);
    assert_eq!(coverage.metric, Some(72.0));
    assert_eq!(verdict.overall_status, OverallStatus::Blocked);
}
