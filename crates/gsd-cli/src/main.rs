//! GSD CLI - operator harness for the virtual kernel.
//!
//! - `gsd status` - engine schedule, budget and mailboxes
//! - `gsd exec` - run an offload operation with feedback capture
//! - `gsd drift check` - compare hashes through the drift monitor
//! - `gsd feedback` - recent feedback entries
//! - `gsd init` - write a default `.gsd/kernel.yaml`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use gsd_core::offload::ScriptType;
use gsd_core::store::FEEDBACK_CATEGORY;
use gsd_core::{
    DriftMonitor, FeedbackBridge, FeedbackEntry, JsonlPatternStore, Kernel, KernelConfig,
    OffloadExecutor, OffloadOperation, PatternStore, SignalBus,
};

#[derive(Parser)]
#[command(name = "gsd")]
#[command(about = "GSD virtual kernel", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show kernel state after one tick
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a script out of process
    Exec {
        /// Script text
        script: String,

        /// Interpreter: bash, sh, node or python
        #[arg(short = 't', long = "type", default_value = "bash")]
        script_type: ScriptType,

        /// Timeout in milliseconds (defaults to the configured value)
        #[arg(long)]
        timeout: Option<u64>,

        /// Working directory (defaults to the project root)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Operation id (defaults to a timestamped one)
        #[arg(long)]
        id: Option<String>,
    },

    /// Drift monitoring
    Drift {
        #[command(subcommand)]
        command: DriftCommands,
    },

    /// Show recent feedback entries
    Feedback {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        /// Only entries for this operation
        #[arg(long)]
        operation: Option<String>,
    },

    /// Initialize a project
    Init,
}

#[derive(Subcommand)]
enum DriftCommands {
    /// Record a hash comparison for an operation
    Check {
        operation: String,
        actual: String,
        expected: String,
    },

    /// List operations at or above the demotion threshold
    Demoted,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Some(Commands::Status { json }) => show_status(&project_root, json),
        Some(Commands::Exec {
            script,
            script_type,
            timeout,
            cwd,
            id,
        }) => run_exec(&project_root, script, script_type, timeout, cwd, id).await,
        Some(Commands::Drift { command }) => handle_drift(&project_root, command),
        Some(Commands::Feedback { limit, operation }) => {
            show_feedback(&project_root, limit, operation.as_deref())
        }
        Some(Commands::Init) => init_project(&project_root),
        None => {
            println!("GSD - virtual kernel");
            println!();
            println!("Usage: gsd <COMMAND>");
            println!();
            println!("Commands:");
            println!("  status    Show kernel state");
            println!("  exec      Run a script out of process");
            println!("  drift     Drift monitoring");
            println!("  feedback  Show recent feedback entries");
            println!("  init      Initialize a project");
            println!();
            println!("Run 'gsd --help' for more information.");
            Ok(())
        }
    }
}

fn load_config(project_root: &Path) -> Result<KernelConfig> {
    let mut config = KernelConfig::load_from_project(project_root)?;
    config.resolve_paths(project_root);
    Ok(config)
}

fn open_store(config: &KernelConfig) -> Arc<dyn PatternStore> {
    Arc::new(JsonlPatternStore::new(&config.store_dir))
}

fn show_status(project_root: &Path, json: bool) -> Result<()> {
    let config = load_config(project_root)?;
    let mut kernel = Kernel::from_config(&config)?;
    kernel.start();
    let report = kernel.tick()?;
    let snapshot = kernel.get_state();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("GSD Kernel Status");
    println!("=================");
    println!();
    println!("Project: {}", project_root.display());
    println!(
        "Budget: {} tokens ({:?})",
        config.total_budget,
        kernel.budget_mode()
    );
    println!();
    println!("Schedule (tick {}): {}", report.tick_count, report.scheduled.join(" > "));
    println!();
    println!("Engines:");
    for engine in &snapshot.engines {
        println!(
            "  {:<10} priority {:>4}  {}  pending {}  remaining {}",
            engine.engine_name,
            engine.priority,
            if engine.asleep { "asleep" } else { "awake " },
            engine.pending_messages,
            engine.remaining,
        );
    }

    Ok(())
}

async fn run_exec(
    project_root: &Path,
    script: String,
    script_type: ScriptType,
    timeout: Option<u64>,
    cwd: Option<PathBuf>,
    id: Option<String>,
) -> Result<()> {
    let config = load_config(project_root)?;
    let id = id.unwrap_or_else(|| format!("exec:{}", Utc::now().format("%Y%m%dT%H%M%S%3f")));
    let working_dir = cwd.unwrap_or_else(|| project_root.to_path_buf());

    let mut operation = OffloadOperation::new(&id, script_type, script, working_dir);
    if let Some(timeout_ms) = timeout {
        operation = operation.with_timeout_ms(timeout_ms);
    }

    let bus = Arc::new(SignalBus::new());
    let bridge = FeedbackBridge::new(Arc::clone(&bus), open_store(&config));
    bridge.start();

    let executor = OffloadExecutor::new(config.offload.clone()).with_bus(bus);
    let signal = executor.execute(&operation).await;
    bridge.stop();

    tracing::info!(
        operation_id = %signal.operation_id,
        status = %signal.status,
        "Operation finished"
    );
    println!("{}", serde_json::to_string_pretty(&signal)?);
    Ok(())
}

fn handle_drift(project_root: &Path, command: DriftCommands) -> Result<()> {
    let config = load_config(project_root)?;
    let mut monitor = DriftMonitor::new(open_store(&config), config.drift.clone());

    match command {
        DriftCommands::Check {
            operation,
            actual,
            expected,
        } => {
            let decision = monitor.check(&operation, &actual, &expected);
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        DriftCommands::Demoted => {
            let demoted = monitor.demoted_operations();
            println!("Demoted operations: {}", demoted.len());
            for operation in demoted {
                println!(
                    "  {} ({} consecutive mismatches)",
                    operation,
                    monitor.consecutive_mismatches(&operation)
                );
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackLine<'a> {
    timestamp: DateTime<Utc>,
    operation_id: &'a str,
    status: &'a str,
    exit_code: i32,
    duration_ms: u64,
    stdout_hash: &'a str,
}

fn show_feedback(project_root: &Path, limit: usize, operation: Option<&str>) -> Result<()> {
    let config = load_config(project_root)?;
    let store = open_store(&config);
    let records = store
        .read(FEEDBACK_CATEGORY)
        .context("Failed to read feedback log")?;

    let entries: Vec<FeedbackEntry> = records
        .into_iter()
        .filter_map(|record| serde_json::from_value(record.data).ok())
        .filter(|entry: &FeedbackEntry| operation.map_or(true, |op| entry.operation_id == op))
        .collect();

    let skip = entries.len().saturating_sub(limit);
    for entry in &entries[skip..] {
        let line = FeedbackLine {
            timestamp: entry.timestamp,
            operation_id: &entry.operation_id,
            status: entry.status.as_str(),
            exit_code: entry.exit_code,
            duration_ms: entry.duration_ms,
            stdout_hash: &entry.stdout_hash,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}

fn init_project(project_root: &Path) -> Result<()> {
    let gsd_dir = project_root.join(".gsd");
    std::fs::create_dir_all(gsd_dir.join("patterns"))
        .with_context(|| format!("Failed to create {}", gsd_dir.display()))?;

    let config_path = gsd_dir.join("kernel.yaml");
    if !config_path.exists() {
        let default_config = r#"# GSD Kernel Configuration

total_budget: 200000
budget_mode: advisory

engines:
  - { name: router, priority: 40 }
  - { name: planner, priority: 30 }
  - { name: io, priority: 20 }
  - { name: renderer, priority: 10 }
  - { name: formatter, priority: 10 }
  - { name: observer, priority: 5 }

offload:
  default_timeout_ms: 30000
  kill_grace_ms: 2000
  max_output_bytes: 1048576

drift:
  enabled: true
  sensitivity: 3
  category: drift

store_dir: .gsd/patterns
"#;
        std::fs::write(&config_path, default_config)?;
    }

    println!("Initialized GSD project at {}", project_root.display());
    println!();
    println!("Created:");
    println!("  .gsd/kernel.yaml - kernel configuration");
    println!("  .gsd/patterns/   - feedback and drift logs");
    println!();
    println!("Next steps:");
    println!("  1. Run: gsd status");
    println!("  2. Run: gsd exec 'echo hello'");

    Ok(())
}
