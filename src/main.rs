//! specloop - Autonomous Coding Loop
//!
//! Runs an AI coding assistant against a task spec until every task is
//! finished, progress stalls, or the iteration limit is reached.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use specloop::config::{ErrorPolicy, HarnessKind, LoopConfig, ProjectSettings};
use specloop::r#loop::{LoopManager, RunResult};
use specloop::signals::cancel_on_signal;
use specloop::sink::{ConsoleSink, EventSink, HeadlessSink};
use specloop::spec::{select_tasks, MarkdownSpecSource, SpecSource};
use specloop::HarnessProcess;

/// Exit code for CLI and configuration errors.
const EXIT_CLI_ERROR: i32 = 3;

#[derive(Parser)]
#[command(name = "specloop")]
#[command(version)]
#[command(about = "Drive an AI coding assistant through a task spec until it is done", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loop
    Run(RunArgs),

    /// Show the spec and the next task batch
    Status {
        /// Spec file (defaults to SPEC.md in the project)
        #[arg(long, value_name = "PATH")]
        spec: Option<PathBuf>,

        /// Task budget used to preview the next batch
        #[arg(long, value_name = "POINTS")]
        budget: Option<u32>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Maximum iterations
    #[arg(short, long, value_name = "N", conflicts_with = "until_done")]
    iterations: Option<u32>,

    /// Keep iterating until every task is finished or the run is stuck
    #[arg(long)]
    until_done: bool,

    /// Seconds without output before the assistant is killed
    #[arg(long, value_name = "SECS")]
    idle_timeout: Option<u64>,

    /// Iterations without progress before the run is stuck
    #[arg(long, value_name = "N")]
    stuck_threshold: Option<u32>,

    /// Task points per iteration (S=1, M=2, L=4)
    #[arg(long, value_name = "POINTS")]
    budget: Option<u32>,

    /// Model passed to the assistant
    #[arg(long)]
    model: Option<String>,

    /// Assistant harness: `claude` or a command speaking the same stream format
    #[arg(long, env = "SPECLOOP_HARNESS")]
    harness: Option<String>,

    /// Spec file (defaults to SPEC.md in the project)
    #[arg(long, value_name = "PATH")]
    spec: Option<PathBuf>,

    /// Emit JSON lines on stdout instead of the interactive view
    #[arg(long)]
    headless: bool,

    /// Keep going after failed iterations, up to N in a row
    #[arg(long, value_name = "N")]
    continue_on_error: Option<u32>,

    /// Write the final run result as JSON
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // usage errors exit 3; clap's default of 2 is the iteration-limit code
            let code = if e.use_stderr() { EXIT_CLI_ERROR } else { 0 };
            if let Err(io) = e.print() {
                eprintln!("{}", e.render());
                eprintln!("{} failed to write usage output: {io}", "Error:".red().bold());
                std::process::exit(EXIT_CLI_ERROR);
            }
            std::process::exit(code);
        }
    };

    init_tracing(cli.verbose, cli.log_json);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            EXIT_CLI_ERROR
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose {
        "specloop=debug,info"
    } else {
        "specloop=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr; headless stdout carries only events
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());
    if !project_path.is_dir() {
        anyhow::bail!("Project directory does not exist: {}", project_path.display());
    }

    match cli.command {
        Commands::Run(args) => cmd_run(&project_path, args).await,
        Commands::Status { spec, budget, json } => cmd_status(&project_path, spec, budget, json),
    }
}

fn resolve_config(project: &Path, args: &RunArgs) -> anyhow::Result<LoopConfig> {
    let settings = ProjectSettings::load(project)?;
    let mut config = LoopConfig::new(project).with_settings(&settings);

    if let Some(spec) = &args.spec {
        config = config.with_spec_path(project.join(spec));
    }
    if args.until_done {
        config = config.with_max_iterations(None);
    } else if let Some(max) = args.iterations {
        config = config.with_max_iterations(Some(max));
    }
    if let Some(secs) = args.idle_timeout {
        config = config.with_idle_timeout(Duration::from_secs(secs));
    }
    if let Some(threshold) = args.stuck_threshold {
        config = config.with_stuck_threshold(threshold);
    }
    if let Some(budget) = args.budget {
        config = config.with_task_budget(budget);
    }
    if let Some(model) = &args.model {
        config = config.with_model(model);
    }
    if let Some(harness) = &args.harness {
        config = config.with_harness(HarnessKind::parse(harness));
    }
    if let Some(max) = args.continue_on_error {
        config = config.with_error_policy(ErrorPolicy::Continue {
            max_consecutive_errors: max,
        });
    }

    config.validate()?;
    Ok(config)
}

async fn cmd_run(project: &Path, args: RunArgs) -> anyhow::Result<i32> {
    let config = resolve_config(project, &args)?;

    let sink: Box<dyn EventSink> = if args.headless {
        Box::new(HeadlessSink::stdout())
    } else if std::io::stdout().is_terminal() {
        Box::new(ConsoleSink::new())
    } else {
        Box::new(ConsoleSink::hidden())
    };
    let process = Arc::new(HarnessProcess::new(config.harness.clone()));
    let spec = Arc::new(MarkdownSpecSource::new(&config.spec_path));

    let cancel = CancellationToken::new();
    let listener = cancel_on_signal(cancel.clone());

    let mut manager = LoopManager::new(config, process, spec, sink, cancel);
    let result = manager.run().await;
    listener.abort();
    drop(manager);
    let result = result?;

    if let Some(path) = &args.report {
        write_report(path, &result)?;
    }
    Ok(result.exit_code)
}

fn write_report(path: &Path, result: &RunResult) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "run report written");
    Ok(())
}

fn cmd_status(
    project: &Path,
    spec: Option<PathBuf>,
    budget: Option<u32>,
    json: bool,
) -> anyhow::Result<i32> {
    let settings = ProjectSettings::load(project)?;
    let mut config = LoopConfig::new(project).with_settings(&settings);
    if let Some(spec) = spec {
        config = config.with_spec_path(project.join(spec));
    }
    if let Some(budget) = budget {
        config = config.with_task_budget(budget);
    }
    config.validate()?;

    let source = MarkdownSpecSource::new(&config.spec_path);
    let snapshot = source.load()?;
    let batch = snapshot.as_ref().map(|s| select_tasks(s, config.task_budget));

    if json {
        let value = serde_json::json!({
            "spec": source.location(),
            "available": snapshot.is_some(),
            "tasks": snapshot.as_ref().map(|s| &s.tasks),
            "next_batch": batch,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(0);
    }

    let Some(snapshot) = snapshot else {
        println!(
            "{} No tasks found in {}",
            "Warning:".yellow().bold(),
            source.location()
        );
        return Ok(0);
    };

    println!("{} {}", "Spec:".bold(), source.location());
    println!(
        "{} {} total, {} pending, {} finished",
        "Tasks:".bold(),
        snapshot.len(),
        snapshot.pending_count(),
        snapshot.terminal_count()
    );
    println!();
    for task in &snapshot.tasks {
        let status = task.status.to_string();
        let status = match task.status {
            specloop::TaskStatus::Passed => status.green(),
            specloop::TaskStatus::Failed => status.red(),
            specloop::TaskStatus::InProgress => status.yellow(),
            specloop::TaskStatus::Pending => status.normal(),
        };
        println!("  {:<8} [{}] {:<12} {}", task.id, task.size.letter(), status, task.title);
    }

    if let Some(batch) = batch {
        println!();
        if batch.is_degraded() {
            let id = batch.oversized.as_ref().map_or("-", |t| t.id.as_str());
            println!(
                "{} No pending task fits {} points; {} would run degraded",
                "Next:".bold(),
                batch.budget,
                id
            );
        } else if batch.is_empty() {
            println!("{} nothing left to do", "Next:".bold());
        } else {
            println!(
                "{} {} ({}/{} points)",
                "Next:".bold(),
                batch.ids().join(", "),
                batch.points,
                batch.budget
            );
        }
    }
    Ok(0)
}
