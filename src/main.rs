use anyhow::Result;
use clap::{Parser, Subcommand};
use flagsync::config::SyncConfig;
use std::path::PathBuf;
use std::time::Duration;

mod cmd;

#[derive(Parser)]
#[command(name = "flagsync")]
#[command(
    version,
    about = "Shared-memory flags between a training supervisor and its workers"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to flagsync.toml (defaults to ./flagsync.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Memory-backed directory holding the flag file. Skips RAM disk mounting.
    #[arg(long, global = true)]
    pub shm_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the path of the shared flag file
    Path,
    /// Provision the memory-backed store (supervisor only)
    Mount,
    /// Decommission the memory-backed store (supervisor only)
    Unmount,
    /// Publish the default flags
    Init {
        /// Overwrite flags that are already published
        #[arg(long)]
        force: bool,
    },
    /// Publish the default flags, replacing whatever is there
    Reset,
    /// Print every flag
    Show {
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Print one flag
    Get { field: String },
    /// Assign flags and publish them, e.g. `flagsync set kill=true`
    Set {
        #[arg(required = true, value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
    },
    /// Follow the worker's progress until it finishes or is told to stop
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Give up after this many polls
        #[arg(long)]
        max_polls: Option<u64>,
    },
    /// Run a worker command under supervision of the shared flags
    Supervise {
        /// Leave the flag store in place when the worker exits
        #[arg(long)]
        keep: bool,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Worker command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default flagsync.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::with_cli_args(cli.config.clone(), cli.shm_dir.clone(), cli.verbose)?;
    let log = flagsync::logging::init(&config.log_options())?;

    match &cli.command {
        Commands::Path => cmd::cmd_path(&config),
        Commands::Mount => cmd::cmd_mount(&config)?,
        Commands::Unmount => cmd::cmd_unmount(&config)?,
        Commands::Init { force } => cmd::cmd_init(&config, *force)?,
        Commands::Reset => cmd::cmd_init(&config, true)?,
        Commands::Show { json } => cmd::cmd_show(&config, &log, *json)?,
        Commands::Get { field } => cmd::cmd_get(&config, &log, field)?,
        Commands::Set { assignments } => cmd::cmd_set(&config, &log, assignments)?,
        Commands::Watch {
            interval_ms,
            max_polls,
        } => {
            cmd::cmd_watch(
                &config,
                &log,
                Duration::from_millis(*interval_ms),
                *max_polls,
            )
            .await?
        }
        Commands::Supervise {
            keep,
            interval_ms,
            command,
        } => {
            cmd::cmd_supervise(&config, command, Duration::from_millis(*interval_ms), *keep)
                .await?
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
