//! Packsmith - Turn-Based Build-Loop Controller
//!
//! Drives an agent-assisted package build until it compiles, lints,
//! tests, and publishes, or safely hands control back to a human.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use packsmith::config::{default_state_dir, LoopConfig};
use packsmith::error::{PacksmithError, Result};
use packsmith::r#loop::operations::{
    tool_available, AgentCliChangeApplier, AgentCliDecisionProvider, NpmDependencyResolver,
    NpmPublisher, NpmQualityRunner, NpmTestRunner,
};
use packsmith::r#loop::{Collaborators, LoopController, LoopResult};
use packsmith::session::persistence::JsonStateStore;
use packsmith::testing::traits::StateStore;

#[derive(Parser)]
#[command(name = "packsmith")]
#[command(version = "0.1.0")]
#[command(about = "Autonomous build loop for package publication", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// State directory (defaults to <project>/.packsmith)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build loop from a fresh state
    Run {
        /// Maximum iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Hours to wait for a human response when a file is stuck
        /// (0 disables the wait)
        #[arg(long, default_value = "24", value_name = "HOURS")]
        escalation_timeout: u64,

        /// Agent binary used for decisions and code changes
        #[arg(long, default_value = "claude")]
        agent: String,

        /// Skip session persistence (run is not resumable)
        #[arg(long)]
        no_persist: bool,
    },

    /// Resume a previously paused or crashed run
    Resume {
        /// Maximum iterations
        #[arg(short, long)]
        max_iterations: Option<u32>,

        /// Hours to wait for a human response when a file is stuck
        /// (0 disables the wait)
        #[arg(long, default_value = "24", value_name = "HOURS")]
        escalation_timeout: u64,

        /// Agent binary used for decisions and code changes
        #[arg(long, default_value = "claude")]
        agent: String,
    },

    /// Show the saved session, if any
    Status,

    /// Delete the saved session
    Clean,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let state_dir = cli
        .state_dir
        .unwrap_or_else(|| default_state_dir(&cli.project));

    match cli.command {
        Commands::Run {
            max_iterations,
            escalation_timeout,
            agent,
            no_persist,
        } => {
            let config = build_config(&cli.project, max_iterations, escalation_timeout)?;
            let collaborators =
                build_collaborators(&cli.project, &state_dir, &agent, no_persist)?;
            let (controller, handle) = LoopController::new(config, collaborators)?;
            drive(controller, handle).await
        }
        Commands::Resume {
            max_iterations,
            escalation_timeout,
            agent,
        } => {
            let config = build_config(&cli.project, max_iterations, escalation_timeout)?;
            let collaborators = build_collaborators(&cli.project, &state_dir, &agent, false)?;
            let (controller, handle) = LoopController::resume(config, collaborators)?;
            drive(controller, handle).await
        }
        Commands::Status => status(&state_dir),
        Commands::Clean => clean(&state_dir),
    }
}

fn build_config(
    project: &Path,
    max_iterations: Option<u32>,
    escalation_timeout_hours: u64,
) -> Result<LoopConfig> {
    let mut config = LoopConfig::load(project)?;
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }
    if escalation_timeout_hours > 0 {
        config.escalation_timeout_secs = Some(escalation_timeout_hours * 60 * 60);
    }
    config.validate()?;
    Ok(config)
}

fn build_collaborators(
    project: &Path,
    state_dir: &Path,
    agent: &str,
    no_persist: bool,
) -> Result<Collaborators> {
    for tool in ["npm", "git", agent] {
        if !tool_available(tool) {
            return Err(PacksmithError::MissingTool {
                tool: tool.to_string(),
            });
        }
    }

    let mut collaborators = Collaborators::new(
        Arc::new(AgentCliDecisionProvider::new(project.to_path_buf()).with_agent_bin(agent)),
        Arc::new(AgentCliChangeApplier::new(project.to_path_buf()).with_agent_bin(agent)),
        Arc::new(NpmQualityRunner::new(project.to_path_buf())),
        Arc::new(NpmTestRunner::new(project.to_path_buf())),
        Arc::new(NpmPublisher::new(project.to_path_buf())),
        Arc::new(NpmDependencyResolver::new(project.to_path_buf())),
    );

    if !no_persist {
        collaborators = collaborators.with_store(Arc::new(JsonStateStore::new(state_dir)));
    }

    Ok(collaborators)
}

async fn drive(
    controller: LoopController,
    handle: packsmith::r#loop::LoopHandle,
) -> Result<()> {
    // Ctrl+C pauses at the next turn boundary instead of killing the
    // in-flight command; the saved session can be resumed later.
    let pause_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                "pause requested; finishing the current turn".yellow()
            );
            pause_handle.graceful_pause();
        }
    });

    let result = controller.run().await?;
    print_result(&result);

    if result.success {
        Ok(())
    } else {
        Err(PacksmithError::loop_error(
            result.error.unwrap_or_else(|| "loop failed".to_string()),
        ))
    }
}

fn print_result(result: &LoopResult) {
    if result.success {
        println!(
            "{} published after {} iteration(s)",
            "success:".green().bold(),
            result.total_iterations
        );
    } else {
        println!(
            "{} stopped after {} iteration(s)",
            "failed:".red().bold(),
            result.total_iterations
        );
        if let Some(error) = &result.error {
            println!("  {error}");
        }
    }

    if !result.files_modified.is_empty() {
        println!("files modified:");
        for file in &result.files_modified {
            println!("  - {file}");
        }
    }
}

fn status(state_dir: &Path) -> Result<()> {
    let store = JsonStateStore::new(state_dir);
    match store
        .load()
        .map_err(|e| PacksmithError::persistence(e.to_string()))?
    {
        Some(session) => {
            let state = &session.loop_state;
            println!("session:    {}", session.metadata.session_id);
            println!("saved at:   {}", session.metadata.saved_at);
            println!("iterations: {}", state.loop_count);
            println!("phase:      {}", state.current_phase());
            println!("modified:   {} file(s)", state.files_modified.len());
            println!("failing:    {} file(s)", state.failure_tracker.len());
            if state.pause_requested {
                println!("{}", "paused; resume with `packsmith resume`".yellow());
            }
        }
        None => println!("no saved session"),
    }
    Ok(())
}

fn clean(state_dir: &Path) -> Result<()> {
    let store = JsonStateStore::new(state_dir);
    if store.exists() {
        store
            .delete()
            .map_err(|e| PacksmithError::persistence(e.to_string()))?;
        println!("saved session removed");
    } else {
        println!("no saved session");
    }
    Ok(())
}
