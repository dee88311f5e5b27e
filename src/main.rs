use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use multispace::config::Overrides;
use multispace::logging::LogFormat;

mod cmd;

#[derive(Parser)]
#[command(name = "multispace")]
#[command(version, about = "Drive remote Terraform runs from plan to apply")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    pub log_format: LogFormat,

    /// Path to multispace.toml (defaults to ./multispace.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where the run identifier is recorded (defaults to .multispace/run-id)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a run and wait for it to plan and apply
    Create(RunArgs),
    /// Queue a destroy run and wait for it to apply
    Destroy(RunArgs),
    /// Check that the recorded run still exists
    Read {
        /// Run identifier (defaults to the recorded one)
        #[arg(long)]
        id: Option<String>,
    },
    /// Reconcile changed settings against the recorded run
    Update,
    /// View, validate or create multispace.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone, Debug, Default)]
pub struct RunArgs {
    #[arg(long)]
    pub organization: Option<String>,

    #[arg(long)]
    pub workspace: Option<String>,

    /// Wait for the plan to be confirmed in the web UI instead of applying it
    #[arg(long)]
    pub manual_confirm: bool,

    /// Fail on the first errored run instead of retrying
    #[arg(long)]
    pub no_retry: bool,

    #[arg(long)]
    pub retry_attempts: Option<u32>,

    /// Seconds
    #[arg(long)]
    pub retry_backoff_min: Option<u64>,

    /// Seconds
    #[arg(long)]
    pub retry_backoff_max: Option<u64>,

    /// Give up waiting after this many minutes
    #[arg(long)]
    pub timeout_minutes: Option<u64>,
}

impl RunArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            organization: self.organization.clone(),
            workspace: self.workspace.clone(),
            manual_confirm: self.manual_confirm.then_some(true),
            retry: self.no_retry.then_some(false),
            retry_attempts: self.retry_attempts,
            retry_backoff_min: self.retry_backoff_min,
            retry_backoff_max: self.retry_backoff_max,
            timeout_minutes: self.timeout_minutes,
        }
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default multispace.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    multispace::logging::init(cli.verbose, cli.log_format);

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => std::env::current_dir()
            .context("Failed to get current directory")?
            .join(multispace::config::CONFIG_FILE),
    };

    let ok = match &cli.command {
        Commands::Create(args) => cmd::cmd_create(&cli, &config_path, args).await?,
        Commands::Destroy(args) => cmd::cmd_destroy(&cli, &config_path, args).await?,
        Commands::Read { id } => cmd::cmd_read(&cli, &config_path, id.as_deref()).await?,
        Commands::Update => cmd::cmd_update(&config_path)?,
        Commands::Config { command } => {
            cmd::cmd_config(&config_path, command.clone())?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
