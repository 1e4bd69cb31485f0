//! envgate CI - environment-aware gate evaluation
//!
//! Decides, for a trigger (branch push, pull request, release tag), which
//! quality gates run and whether the change may advance:
//! - Resolves exactly one environment profile per trigger
//! - Runs the profile's checkers group by group, concurrently within a group
//! - Applies per-environment thresholds and blocking rules
//! - Reports the verdict as an exit code, a summary and a structured record

pub mod checker;
pub mod config;
pub mod error;
pub mod gate;
pub mod obs;
pub mod pipeline;
pub mod profile;
pub mod reporter;
pub mod result;
pub mod spec;
pub mod telemetry;
pub mod trigger;

// Re-export key types
pub use checker::{BuiltinChecker, CheckContext, Checker, CheckerRegistry};
pub use config::{load_resolver, GateConfig};
pub use error::{ConfigError, GateError, ResolutionError, Result};
pub use gate::{OverallStatus, Verdict};
pub use pipeline::{evaluate_trigger, PipelineRunner, RunOptions};
pub use profile::{EnvironmentProfile, ProfileResolver, TriggerRule};
pub use reporter::{exit_code, render, ReportFormat};
pub use result::{CheckFault, CheckResult, CheckStatus};
pub use spec::{CheckerEntry, CheckerKind, GateSpec};
pub use telemetry::init_tracing;
pub use trigger::{EventKind, RefType, TriggerContext};
