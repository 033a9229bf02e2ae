//! Loopguard - Autonomous Agent Loop Supervisor
//!
//! Supervises repeated invocations of an autonomous coding agent,
//! halting on stagnation or repeated errors and stopping voluntarily
//! when the work looks done.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use loopguard::analyzer::AnalysisResult;
use loopguard::breaker::{CircuitBreaker, CircuitBreakerRecord};
use loopguard::config::SupervisorConfig;
use loopguard::controller::LoopController;
use loopguard::invoker::ProcessInvoker;
use loopguard::store::{FileStore, RecordKind, StateStore};
use loopguard::tracker::ExitSignalRecord;
use loopguard::vcs::GitStatus;
use loopguard::LoopguardError;

#[derive(Parser)]
#[command(name = "loopguard")]
#[command(version = "0.1.0")]
#[command(about = "Supervise an autonomous coding agent loop", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervised agent loop
    Run {
        /// Agent command to invoke each iteration
        #[arg(short, long, default_value = "claude")]
        agent: String,

        /// Extra argument passed to the agent (repeatable)
        #[arg(long = "agent-arg", value_name = "ARG")]
        agent_args: Vec<String>,

        /// Prompt text sent to the agent every iteration
        #[arg(default_value = "Continue working on the current task.")]
        prompt: String,

        /// Read the prompt from a file instead
        #[arg(long, value_name = "PATH", conflicts_with = "prompt")]
        prompt_file: Option<PathBuf>,

        /// Maximum iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Per-invocation timeout in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Hourly invocation budget
        #[arg(long, value_name = "N")]
        max_calls_per_hour: Option<u32>,
    },

    /// Show persisted supervisor state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset the circuit breaker to CLOSED
    Reset {
        /// Reason recorded in the transition history
        #[arg(short, long, default_value = "operator reset")]
        reason: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "loopguard=debug,info"
    } else {
        "loopguard=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    let exit_code = match run_command(cli.command, &project_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            e.exit_code()
        }
    };

    std::process::exit(exit_code);
}

async fn run_command(
    command: Commands,
    project_path: &std::path::Path,
) -> Result<i32, LoopguardError> {
    match command {
        Commands::Run {
            agent,
            agent_args,
            prompt,
            prompt_file,
            max_iterations,
            timeout,
            max_calls_per_hour,
        } => {
            let mut config = SupervisorConfig::load(project_path)?;

            if let Some(max) = max_iterations {
                config.max_iterations = max;
            }
            if let Some(secs) = timeout {
                config.agent_timeout_secs = secs;
            }
            if let Some(calls) = max_calls_per_hour {
                config.max_calls_per_hour = calls;
            }
            config.validate()?;

            let prompt = match prompt_file {
                Some(path) => std::fs::read_to_string(&path).map_err(|e| {
                    LoopguardError::config_with_path(
                        format!("cannot read prompt file: {}", e),
                        path,
                    )
                })?,
                None => prompt,
            };

            let invoker = ProcessInvoker::new(&agent, project_path)
                .with_args(agent_args)
                .with_timeout(Duration::from_secs(config.agent_timeout_secs));
            invoker.preflight()?;

            let vcs = GitStatus::new(project_path)?;
            let store = Arc::new(FileStore::new(project_path));

            let mut controller = LoopController::new(config, invoker, vcs, store)?;

            let cancel = controller.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!(
                        "\n{} Interrupt received, stopping after the current iteration",
                        "Info:".blue()
                    );
                    cancel.store(true, Ordering::SeqCst);
                }
            });

            let summary = controller.run(&prompt).await?;

            let label = if summary.outcome.is_success() {
                summary.outcome.to_string().green().bold()
            } else {
                summary.outcome.to_string().yellow().bold()
            };
            println!("\n{} Run finished: {}", "Loopguard:".cyan().bold(), label);
            println!("   Session:    {}", summary.session_id);
            println!("   Iterations: {}", summary.iterations);
            println!("   Duration:   {}s", summary.duration().num_seconds());

            Ok(summary.outcome.exit_code())
        }

        Commands::Status { json } => {
            let store = FileStore::new(project_path);

            let breaker: Option<CircuitBreakerRecord> = store.load(RecordKind::CircuitBreaker)?;
            let signals: Option<ExitSignalRecord> = store.load(RecordKind::ExitSignals)?;
            let analysis: Option<AnalysisResult> = store.load(RecordKind::Analysis)?;

            if json {
                let output = serde_json::json!({
                    "circuit_breaker": breaker,
                    "exit_signals": signals,
                    "last_analysis": analysis,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(0);
            }

            println!("\n{} Supervisor State", "Loopguard:".cyan().bold());
            println!("{}", "─".repeat(40));

            match breaker {
                Some(record) => {
                    println!("   Breaker state:     {}", record.state);
                    println!("   No-progress loops: {}", record.consecutive_no_progress);
                    println!("   Same-error loops:  {}", record.consecutive_same_error);
                    if let Some(sig) = &record.last_error_signature {
                        println!("   Error signature:   {}", sig);
                    }
                    println!("   Updated:           {}", record.updated_at.to_rfc3339());
                }
                None => println!("   No circuit breaker state recorded"),
            }

            match signals {
                Some(record) => {
                    println!();
                    println!("   Test-only loops:   {:?}", record.test_only_loops);
                    println!("   Done signals:      {:?}", record.done_signals);
                    println!("   Completion claims: {:?}", record.completion_indicators);
                }
                None => println!("   No exit signals recorded"),
            }

            match analysis {
                Some(result) => {
                    println!();
                    println!("   Last analyzed loop: {}", result.loop_index);
                    println!("   Confidence score:   {}", result.confidence_score);
                    println!("   Exit signal:        {}", result.exit_signal);
                    println!("   Files modified:     {}", result.files_modified);
                }
                None => println!("   No analysis recorded"),
            }

            Ok(0)
        }

        Commands::Reset { reason } => {
            let config = SupervisorConfig::load(project_path)?;
            let store = Arc::new(FileStore::new(project_path));
            let mut breaker = CircuitBreaker::new(store, &config)?;

            breaker.reset(&reason)?;
            println!(
                "{} Circuit breaker reset to {}",
                "OK".green().bold(),
                breaker.state()
            );

            Ok(0)
        }
    }
}
