//! envgate - environment-aware CI/CD gate evaluation CLI
//!
//! ## Commands
//!
//! - `run`: resolve the profile for a trigger, run its gates and report a verdict
//! - `resolve`: show which profile a trigger selects and its execution plan
//! - `validate`: load and check a gate configuration
//!
//! Exit codes: 0 ready (possibly with warnings), 1 blocked, 2 configuration
//! or resolution error.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use envgate_ci::{
    evaluate_trigger, load_resolver, reporter, EventKind, GateError, ProfileResolver, RefType,
    ReportFormat, TriggerContext,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "envgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Environment-aware CI/CD gate evaluation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct TriggerArgs {
    /// Ref that triggered the run (`main` or `refs/tags/v1.2.3`). Short
    /// names are branches; pass `--ref-type tag` for a short tag name such
    /// as `v1.2.3`.
    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: String,

    /// Ref type; inferred from fully qualified refs when omitted
    #[arg(long, value_enum)]
    ref_type: Option<RefTypeArg>,

    /// Triggering event
    #[arg(long, value_enum, default_value = "push")]
    event: EventArg,
}

#[derive(Copy, Clone, ValueEnum)]
enum RefTypeArg {
    Branch,
    Tag,
}

#[derive(Copy, Clone, ValueEnum)]
enum EventArg {
    Push,
    PullRequest,
}

#[derive(Copy, Clone, ValueEnum)]
enum FormatArg {
    Text,
    Json,
    Kv,
}

impl From<FormatArg> for ReportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => ReportFormat::Text,
            FormatArg::Json => ReportFormat::Json,
            FormatArg::Kv => ReportFormat::KeyValue,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gates for a trigger and report the verdict
    Run {
        /// Gate configuration (YAML or JSON)
        #[arg(short, long, default_value = "gates.yaml", env = "ENVGATE_CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,

        /// Working directory for checker tools
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Report format printed to stdout
        #[arg(short, long, value_enum, default_value = "text")]
        format: FormatArg,

        /// Also write the key=value report to this file (e.g. $GITHUB_OUTPUT)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the profile's total pipeline timeout (seconds)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the profile a trigger resolves to
    Resolve {
        #[arg(short, long, default_value = "gates.yaml", env = "ENVGATE_CONFIG")]
        config: PathBuf,

        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Validate a gate configuration
    Validate {
        #[arg(short, long, default_value = "gates.yaml", env = "ENVGATE_CONFIG")]
        config: PathBuf,
    },
}

/// Build the trigger context from CLI arguments.
fn trigger_context(args: &TriggerArgs) -> TriggerContext {
    let event = match args.event {
        EventArg::Push => EventKind::Push,
        EventArg::PullRequest => EventKind::PullRequest,
    };
    let ctx = TriggerContext::from_git_ref(&args.git_ref, event);
    match args.ref_type {
        Some(RefTypeArg::Branch) => TriggerContext::new(ctx.ref_name, RefType::Branch, ctx.event),
        Some(RefTypeArg::Tag) => TriggerContext::new(ctx.ref_name, RefType::Tag, ctx.event),
        None => ctx,
    }
}

/// Load the config, reporting fatal errors with exit code 2.
fn load(config: &Path) -> std::result::Result<ProfileResolver, ExitCode> {
    load_resolver(config).map_err(|e| fatal(&e))
}

fn fatal(err: &GateError) -> ExitCode {
    error!(error = %err, "Gate evaluation aborted");
    eprintln!("error: {}", err);
    ExitCode::from(err.exit_code() as u8)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    envgate_ci::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            trigger,
            workspace,
            format,
            output,
            timeout_secs,
        } => {
            cmd_run(
                &config,
                &trigger,
                workspace,
                format.into(),
                output.as_deref(),
                timeout_secs,
            )
            .await
        }
        Commands::Resolve { config, trigger } => Ok(cmd_resolve(&config, &trigger)),
        Commands::Validate { config } => Ok(cmd_validate(&config)),
    }
}

/// Resolve, run and report.
async fn cmd_run(
    config: &Path,
    trigger: &TriggerArgs,
    workspace: PathBuf,
    format: ReportFormat,
    output: Option<&Path>,
    timeout_secs: Option<u64>,
) -> Result<ExitCode> {
    let resolver = match load(config) {
        Ok(resolver) => resolver,
        Err(code) => return Ok(code),
    };
    let ctx = trigger_context(trigger);

    let timeout = timeout_secs.map(Duration::from_secs);
    let verdict = match evaluate_trigger(&resolver, &ctx, workspace, timeout).await {
        Ok(verdict) => verdict,
        Err(e) => return Ok(fatal(&e)),
    };

    let rendered = reporter::render(&verdict, format).context("Failed to render verdict")?;
    print!("{}", rendered);

    if let Some(path) = output {
        append_output(path, &reporter::render_key_value(&verdict))?;
    }

    let code = reporter::exit_code(&verdict);
    info!(status = verdict.overall_status.as_str(), exit_code = code, "Gate evaluation finished");
    Ok(ExitCode::from(code as u8))
}

/// Append to a step-output file, creating it if needed.
fn append_output(path: &Path, content: &str) -> Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file: {:?}", path))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write output file: {:?}", path))?;
    Ok(())
}

/// Print the profile a trigger selects.
fn cmd_resolve(config: &Path, trigger: &TriggerArgs) -> ExitCode {
    let resolver = match load(config) {
        Ok(resolver) => resolver,
        Err(code) => return code,
    };
    let ctx = trigger_context(trigger);
    let profile = match resolver.resolve(&ctx) {
        Ok(profile) => profile,
        Err(e) => return fatal(&e.into()),
    };

    println!("Trigger: {}", ctx);
    println!("Profile: {}", profile.name);
    println!("Spec digest: {}", &profile.gate_spec.digest()[..12]);
    println!();
    for (index, group) in profile.gate_spec.execution_plan().iter().enumerate() {
        let members: Vec<String> = group
            .iter()
            .map(|entry| {
                let mut label = format!("{} ({})", entry.name, entry.kind.as_str());
                if !entry.is_effectively_blocking() {
                    label.push_str(" [non-blocking]");
                }
                if let Some(minimum) = profile.gate_spec.threshold(&entry.name) {
                    label.push_str(&format!(" [>= {}]", minimum));
                }
                label
            })
            .collect();
        println!("  group {}: {}", index + 1, members.join(", "));
    }
    ExitCode::SUCCESS
}

/// Load the config and list its profiles.
fn cmd_validate(config: &Path) -> ExitCode {
    let resolver = match load(config) {
        Ok(resolver) => resolver,
        Err(code) => return code,
    };

    println!("✓ {:?} is valid", config);
    println!();
    for profile in resolver.profiles() {
        println!(
            "  {:<12} {:<40} {} checker(s)",
            profile.name,
            profile.trigger.describe(),
            profile.gate_spec.checkers.len()
        );
    }
    ExitCode::SUCCESS
}
