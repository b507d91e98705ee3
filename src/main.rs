use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use agentflow::config::{CONFIG_DIR, EngineConfig};
use agentflow_common::{AnalystPreference, ExecutionMode, TaskType};

mod cmd;

#[derive(Parser)]
#[command(name = "agentflow")]
#[command(version, about = "Multi-agent workflow orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Clone)]
pub struct PlanArgs {
    /// Free-text task description
    pub description: String,

    /// feature_implementation, bug_fix, refactoring, documentation, testing, or a custom type
    #[arg(short, long, default_value = "feature_implementation")]
    pub task_type: TaskType,

    /// Include the analyst role: auto, yes, no (defaults to engine.analyst)
    #[arg(long)]
    pub analyst: Option<AnalystPreference>,

    /// sequential, parallel or graph (defaults to engine.default_mode)
    #[arg(short, long)]
    pub mode: Option<ExecutionMode>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Plan and execute a task
    Run {
        #[command(flatten)]
        args: PlanArgs,
    },
    /// Show the workflow a task would get, without invoking anything
    Plan {
        #[command(flatten)]
        args: PlanArgs,
    },
    /// Show a stored task and its agents
    Show { task_id: String },
    /// List stored tasks
    List,
    /// View or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration and any warnings
    Show,
    /// Write a default agentflow.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = EngineConfig::load_or_default(&project_dir.join(CONFIG_DIR))?;

    // Only a run produces events worth keeping on disk.
    let log_dir = matches!(cli.command, Commands::Run { .. }).then(|| config.log_dir(&project_dir));
    let _guard = agentflow::logging::init(cli.verbose, cli.json, log_dir.as_deref())?;

    match &cli.command {
        Commands::Run { args } => cmd::cmd_run(&project_dir, config, args).await?,
        Commands::Plan { args } => cmd::cmd_plan(&config, args)?,
        Commands::Show { task_id } => cmd::cmd_show(&project_dir, &config, task_id).await?,
        Commands::List => cmd::cmd_list(&project_dir, &config).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, &config, command.clone())?,
    }

    Ok(())
}
