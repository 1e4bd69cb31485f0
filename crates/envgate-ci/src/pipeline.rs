//! Pipeline runner: executes a gate spec's checkers group by group and
//! aggregates their results into a [`Verdict`].

use crate::checker::{CheckContext, Checker, CheckerRegistry};
use crate::error::Result;
use crate::gate::{apply_threshold, classify, Contribution, Verdict};
use crate::obs;
use crate::profile::{EnvironmentProfile, ProfileResolver};
use crate::result::{CheckFault, CheckResult};
use crate::spec::{CheckerEntry, GateSpec};
use crate::trigger::TriggerContext;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn, Instrument};

/// Execution limits for a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOptions {
    /// Total budget for the whole pipeline.
    pub pipeline_timeout: Option<Duration>,

    /// Maximum checkers running at once within a group.
    pub max_concurrency: Option<usize>,
}

impl RunOptions {
    pub fn from_spec(spec: &GateSpec) -> Self {
        Self {
            pipeline_timeout: spec.pipeline_timeout_secs.map(Duration::from_secs),
            max_concurrency: spec.max_concurrency,
        }
    }
}

/// Aborts the wrapped task when dropped, so cancelling a group also stops
/// the checker it was waiting on.
struct AbortOnDrop(JoinHandle<CheckResult>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct GroupOutcome {
    results: Vec<CheckResult>,
    timed_out: bool,
}

/// Executes one gate spec.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    spec: GateSpec,
    registry: CheckerRegistry,
    options: RunOptions,
}

impl PipelineRunner {
    pub fn new(spec: GateSpec, registry: CheckerRegistry) -> Self {
        let options = RunOptions::from_spec(&spec);
        Self {
            spec,
            registry,
            options,
        }
    }

    /// Runner with the built-in checkers for a profile.
    pub fn for_profile(profile: &EnvironmentProfile) -> Self {
        let registry = CheckerRegistry::from_spec(&profile.gate_spec);
        Self::new(profile.gate_spec.clone(), registry)
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn spec(&self) -> &GateSpec {
        &self.spec
    }

    /// Run every group of the execution plan and aggregate a verdict.
    ///
    /// Groups run strictly in sequence; checkers inside a group run
    /// concurrently. A blocking failure stops later groups from starting,
    /// and the pipeline timeout turns outstanding checkers into errors.
    pub async fn run(&self, trigger: &TriggerContext, workspace: impl Into<PathBuf>) -> Verdict {
        let span = obs::pipeline_span(&self.spec.environment_name, &trigger.to_string());
        self.run_plan(trigger, workspace.into()).instrument(span).await
    }

    async fn run_plan(&self, trigger: &TriggerContext, workspace: PathBuf) -> Verdict {
        let started_at = Utc::now();
        let deadline = self.options.pipeline_timeout.map(|t| Instant::now() + t);
        let ctx = Arc::new(CheckContext::new(
            trigger.clone(),
            self.spec.environment_name.clone(),
            workspace,
        ));

        let plan = self.spec.execution_plan();
        obs::emit_pipeline_started(&self.spec.environment_name, plan.len(), self.spec.checkers.len());

        let mut results = Vec::with_capacity(self.spec.checkers.len());
        let mut halted: Option<String> = None;
        let mut timed_out = false;

        for (index, group) in plan.iter().enumerate() {
            if let Some(reason) = &halted {
                for entry in group {
                    results.push(CheckResult::skipped(&entry.name, reason.clone()));
                }
                continue;
            }

            let names: Vec<&str> = group.iter().map(|e| e.name.as_str()).collect();
            obs::emit_group_started(index, &names);

            let outcome = self.run_group(index, group, &ctx, deadline).await;

            let blocking: Vec<String> = outcome
                .results
                .iter()
                .filter(|r| classify(&self.spec, r) == Contribution::Blocking)
                .map(|r| r.checker_name.clone())
                .collect();
            results.extend(outcome.results);

            if outcome.timed_out {
                timed_out = true;
                halted = Some("not run: pipeline timed out".to_string());
            } else if !blocking.is_empty() {
                let refs: Vec<&str> = blocking.iter().map(String::as_str).collect();
                obs::emit_groups_skipped(index + 1, &refs);
                halted = Some(format!("not run: blocked by {}", blocking.join(", ")));
            }
        }

        let mut verdict = Verdict::aggregate(&self.spec, trigger, results, started_at);
        verdict.timed_out = timed_out;
        obs::emit_verdict(&verdict);
        verdict
    }

    async fn run_group(
        &self,
        index: usize,
        group: &[&CheckerEntry],
        ctx: &Arc<CheckContext>,
        deadline: Option<Instant>,
    ) -> GroupOutcome {
        let group_started = Utc::now();

        if deadline.is_some_and(|d| Instant::now() >= d) {
            let names: Vec<&str> = group.iter().map(|e| e.name.as_str()).collect();
            obs::emit_pipeline_timeout(index, &names);
            return GroupOutcome {
                results: timed_out_results(group, group_started),
                timed_out: true,
            };
        }

        let permits = self.options.max_concurrency.unwrap_or(group.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut slots: Vec<Option<CheckResult>> = vec![None; group.len()];
        let mut join_set = JoinSet::new();

        for (idx, entry) in group.iter().enumerate() {
            let checker = match self.registry.get(&entry.name) {
                Some(checker) => checker,
                None => {
                    slots[idx] = Some(
                        CheckResult::error(&entry.name, &CheckFault::NotRegistered)
                            .timed(group_started, Utc::now()),
                    );
                    continue;
                }
            };
            let name = entry.name.clone();
            let ctx = Arc::clone(ctx);
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    (idx, run_checker(name, checker, ctx).await)
                }
                .in_current_span(),
            );
        }

        let mut timed_out = false;
        loop {
            let next = match deadline {
                Some(d) => match tokio::time::timeout_at(d, join_set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => join_set.join_next().await,
            };
            match next {
                Some(Ok((idx, result))) => {
                    obs::emit_check_finished(&result);
                    slots[idx] = Some(result);
                }
                Some(Err(e)) => warn!(error = %e, "Checker task failed to join"),
                None => break,
            }
        }

        if timed_out {
            let outstanding: Vec<&str> = group
                .iter()
                .zip(&slots)
                .filter(|(_, slot)| slot.is_none())
                .map(|(entry, _)| entry.name.as_str())
                .collect();
            obs::emit_pipeline_timeout(index, &outstanding);
            join_set.abort_all();
        }

        let finished = Utc::now();
        let results = group
            .iter()
            .zip(slots)
            .map(|(entry, slot)| {
                let result = slot.unwrap_or_else(|| {
                    let fault = if timed_out {
                        CheckFault::PipelineTimeout
                    } else {
                        CheckFault::Panicked("checker task was cancelled".to_string())
                    };
                    CheckResult::error(&entry.name, &fault).timed(group_started, finished)
                });
                apply_threshold(&self.spec, result)
            })
            .collect();

        GroupOutcome { results, timed_out }
    }
}

/// Run one checker on its own task so a panic becomes an `Error` result.
async fn run_checker(name: String, checker: Arc<dyn Checker>, ctx: Arc<CheckContext>) -> CheckResult {
    let started = Utc::now();
    debug!(checker = %name, "Starting checker");

    let mut task = AbortOnDrop(tokio::spawn(async move { checker.run(&ctx).await }));
    let result = match (&mut task.0).await {
        Ok(result) if result.checker_name == name => result,
        Ok(result) => CheckResult {
            checker_name: name,
            ..result
        },
        Err(e) => CheckResult::error(&name, &CheckFault::Panicked(e.to_string())),
    };
    result.timed(started, Utc::now())
}

fn timed_out_results(group: &[&CheckerEntry], at: DateTime<Utc>) -> Vec<CheckResult> {
    group
        .iter()
        .map(|e| CheckResult::error(&e.name, &CheckFault::PipelineTimeout).timed(at, at))
        .collect()
}

/// Resolve the profile for `trigger` and run its built-in checkers.
///
/// `pipeline_timeout` replaces the profile's own total budget when set.
pub async fn evaluate_trigger(
    resolver: &ProfileResolver,
    trigger: &TriggerContext,
    workspace: impl Into<PathBuf>,
    pipeline_timeout: Option<Duration>,
) -> Result<Verdict> {
    let profile = resolver.resolve(trigger)?;
    obs::emit_profile_resolved(&profile.name, &trigger.to_string());

    let mut runner = PipelineRunner::for_profile(profile);
    if let Some(timeout) = pipeline_timeout {
        let options = RunOptions {
            pipeline_timeout: Some(timeout),
            ..RunOptions::from_spec(runner.spec())
        };
        runner = runner.with_options(options);
    }
    let verdict = runner.run(trigger, workspace).await;
    Ok(verdict)
}
