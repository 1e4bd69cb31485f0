//! Checkers: units of verification that turn a trigger into a [`CheckResult`].
//!
//! Ordinary failure (lint findings, failing tests) is a `Fail` result. Only
//! environment faults (missing tool, I/O failure, timeout) produce `Error`.

use crate::result::{CheckFault, CheckResult};
use crate::spec::{CheckerEntry, CheckerKind, GateSpec};
use crate::trigger::TriggerContext;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Lines of tool output kept in a failure detail.
const DETAIL_TAIL_LINES: usize = 5;

/// Immutable input shared by every checker of a run.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub trigger: TriggerContext,
    pub environment: String,
    /// Working directory for external tools.
    pub workspace: PathBuf,
}

impl CheckContext {
    pub fn new(trigger: TriggerContext, environment: impl Into<String>, workspace: PathBuf) -> Self {
        Self {
            trigger,
            environment: environment.into(),
            workspace,
        }
    }
}

/// A unit of verification.
///
/// Implementations must not panic or return early for ordinary failures;
/// they report them as `Fail` results.
#[async_trait]
pub trait Checker: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &CheckContext) -> CheckResult;
}

/// Captured output of an external tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last few non-empty lines, preferring stderr.
    fn tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(DETAIL_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Run an external tool in `workspace` with a timeout.
pub async fn run_tool(
    command: &[String],
    workspace: &Path,
    timeout_secs: u64,
) -> Result<ToolOutput, CheckFault> {
    let (exe, args) = command
        .split_first()
        .ok_or_else(|| CheckFault::Io("empty command".to_string()))?;

    let child = Command::new(exe)
        .args(args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CheckFault::ToolMissing { tool: exe.clone() },
            _ => CheckFault::Io(format!("failed to spawn '{}': {}", exe, e)),
        })?;

    let waited = if timeout_secs > 0 {
        tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| CheckFault::Timeout {
                secs: timeout_secs,
            })?
    } else {
        child.wait_with_output().await
    };
    let output = waited
        .map_err(|e| CheckFault::Io(format!("failed to collect output of '{}': {}", exe, e)))?;

    Ok(ToolOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Lint, test and security checkers: pass iff the tool exits 0.
#[derive(Debug, Clone)]
pub struct CommandChecker {
    name: String,
    command: Vec<String>,
    timeout_secs: u64,
}

impl CommandChecker {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
        }
    }

    async fn check(&self, ctx: &CheckContext) -> CheckResult {
        match run_tool(&self.command, &ctx.workspace, self.timeout_secs).await {
            Ok(out) if out.success() => CheckResult::pass(&self.name, "exited with code 0"),
            Ok(out) => {
                let tail = out.tail();
                let detail = if tail.is_empty() {
                    format!("exited with code {}", out.exit_code)
                } else {
                    format!("exited with code {}: {}", out.exit_code, tail)
                };
                CheckResult::fail(&self.name, detail)
            }
            Err(fault) => CheckResult::error(&self.name, &fault),
        }
    }
}

fn default_percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*%").expect("static regex"))
}

/// Extract a metric from tool output: the first capture group of the last
/// match of `pattern`.
pub fn extract_metric(output: &str, pattern: &Regex) -> Option<f64> {
    pattern
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Runs a coverage tool and reports its percentage as the metric.
///
/// The checker's own status reflects only the tool's exit code; enforcing a
/// minimum is left to the threshold configured for the environment.
#[derive(Debug, Clone)]
pub struct CoverageChecker {
    inner: CommandChecker,
    pattern: Option<Regex>,
}

impl CoverageChecker {
    pub fn new(inner: CommandChecker, pattern: Option<Regex>) -> Self {
        Self { inner, pattern }
    }

    async fn check(&self, ctx: &CheckContext) -> CheckResult {
        let name = &self.inner.name;
        let out = match run_tool(&self.inner.command, &ctx.workspace, self.inner.timeout_secs).await
        {
            Ok(out) => out,
            Err(fault) => return CheckResult::error(name, &fault),
        };

        let pattern = self.pattern.as_ref().unwrap_or(default_percent_pattern());
        match (out.success(), extract_metric(&out.stdout, pattern)) {
            (true, Some(metric)) => {
                CheckResult::pass(name, format!("{:.1}% covered", metric)).with_metric(metric)
            }
            (false, Some(metric)) => CheckResult::fail(
                name,
                format!("exited with code {} at {:.1}% covered", out.exit_code, metric),
            )
            .with_metric(metric),
            (true, None) => CheckResult::error(
                name,
                &CheckFault::Inconclusive("no coverage figure in tool output".to_string()),
            ),
            (false, None) => CheckResult::fail(
                name,
                format!("exited with code {}: {}", out.exit_code, out.tail()),
            ),
        }
    }
}

fn release_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^v[0-9]+\.[0-9]+\.[0-9]+$").expect("static regex"))
}

/// Whether `tag` is a strict `vMAJOR.MINOR.PATCH` release tag.
pub fn is_release_tag(tag: &str) -> bool {
    release_tag_pattern().is_match(tag)
}

/// Validates that the triggering tag is a strict release tag.
#[derive(Debug, Clone)]
pub struct VersionFormatChecker {
    name: String,
}

impl VersionFormatChecker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn check(&self, ctx: &CheckContext) -> CheckResult {
        match ctx.trigger.tag_name() {
            Some(tag) if is_release_tag(tag) => {
                CheckResult::pass(&self.name, format!("tag '{}' is a valid release tag", tag))
            }
            Some(tag) => CheckResult::fail(
                &self.name,
                format!("tag '{}' does not match vMAJOR.MINOR.PATCH", tag),
            ),
            None => CheckResult::fail(
                &self.name,
                format!("{} is not a release tag", ctx.trigger),
            ),
        }
    }
}

/// The closed set of built-in checkers.
#[derive(Debug, Clone)]
pub enum BuiltinChecker {
    Lint(CommandChecker),
    Test(CommandChecker),
    Coverage(CoverageChecker),
    Security(CommandChecker),
    VersionFormat(VersionFormatChecker),
}

impl BuiltinChecker {
    /// Build the checker described by a validated entry.
    pub fn from_entry(entry: &CheckerEntry) -> Self {
        let command = || CommandChecker::new(&entry.name, entry.command.clone(), entry.timeout_secs);
        match entry.kind {
            CheckerKind::Lint => BuiltinChecker::Lint(command()),
            CheckerKind::Test => BuiltinChecker::Test(command()),
            CheckerKind::Security => BuiltinChecker::Security(command()),
            CheckerKind::Coverage => {
                // validated by GateSpec::validate
                let pattern = entry
                    .metric_pattern
                    .as_deref()
                    .and_then(|p| Regex::new(p).ok());
                BuiltinChecker::Coverage(CoverageChecker::new(command(), pattern))
            }
            CheckerKind::VersionFormat => {
                BuiltinChecker::VersionFormat(VersionFormatChecker::new(&entry.name))
            }
        }
    }

    pub fn kind(&self) -> CheckerKind {
        match self {
            BuiltinChecker::Lint(_) => CheckerKind::Lint,
            BuiltinChecker::Test(_) => CheckerKind::Test,
            BuiltinChecker::Coverage(_) => CheckerKind::Coverage,
            BuiltinChecker::Security(_) => CheckerKind::Security,
            BuiltinChecker::VersionFormat(_) => CheckerKind::VersionFormat,
        }
    }
}

#[async_trait]
impl Checker for BuiltinChecker {
    fn name(&self) -> &str {
        match self {
            BuiltinChecker::Lint(c) | BuiltinChecker::Test(c) | BuiltinChecker::Security(c) => {
                &c.name
            }
            BuiltinChecker::Coverage(c) => &c.inner.name,
            BuiltinChecker::VersionFormat(c) => &c.name,
        }
    }

    async fn run(&self, ctx: &CheckContext) -> CheckResult {
        let started_at = Utc::now();
        debug!(checker = %self.name(), kind = self.kind().as_str(), "Running checker");
        let result = match self {
            BuiltinChecker::Lint(c) | BuiltinChecker::Test(c) | BuiltinChecker::Security(c) => {
                c.check(ctx).await
            }
            BuiltinChecker::Coverage(c) => c.check(ctx).await,
            BuiltinChecker::VersionFormat(c) => c.check(ctx),
        };
        result.timed(started_at, Utc::now())
    }
}

/// Checkers available to a pipeline, by name.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    checkers: HashMap<String, Arc<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in checkers for every entry of `spec`.
    pub fn from_spec(spec: &GateSpec) -> Self {
        let mut registry = Self::new();
        for entry in &spec.checkers {
            registry.insert(entry.name.clone(), Arc::new(BuiltinChecker::from_entry(entry)));
        }
        registry
    }

    /// Register (or replace) the checker for `name`.
    pub fn insert(&mut self, name: impl Into<String>, checker: Arc<dyn Checker>) {
        self.checkers.insert(name.into(), checker);
    }

    pub fn with(mut self, name: impl Into<String>, checker: Arc<dyn Checker>) -> Self {
        self.insert(name, checker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Checker>> {
        self.checkers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

impl std::fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.checkers.keys().collect();
        names.sort();
        f.debug_struct("CheckerRegistry").field("checkers", &names).finish()
    }
}
