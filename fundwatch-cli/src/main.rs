// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! `FundWatch` CLI - crowdfunding project data from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Fetch one project
//! fundwatch fetch 147002
//!
//! # Batch-fetch ids listed in a file into the record store
//! fundwatch batch --ids-file ids.txt
//!
//! # JSON output
//! fundwatch --format json --pretty fetch 147002 147003
//!
//! # Show the signature for an API call
//! fundwatch sign /p/get_project_limit_status pro_id=147002
//!
//! # Response cache maintenance
//! fundwatch cache stats
//!
//! # Change a setting
//! fundwatch config set max_concurrent_requests 4
//! ```

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fundwatch_store::{LogLevel, Settings, default_settings_path};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{batch, cache, config, fetch, sign};

// ============================================================================
// CLI Definition
// ============================================================================

/// `FundWatch` CLI - crowdfunding project data.
#[derive(Parser)]
#[command(name = "fundwatch")]
#[command(about = "Crowdfunding project data CLI")]
#[command(long_about = r#"
FundWatch fetches project records from modian.com through signed API
calls, with a response cache, error recovery and a headless-browser
fallback for counters the API reports as zero.

Examples:
  fundwatch fetch 147002             # One project
  fundwatch batch --ids-file ids.txt # Many projects, stored to disk
  fundwatch --format json fetch 1 2  # JSON output
  fundwatch cache stats              # Response cache usage
  fundwatch config show              # Current settings
"#)]
#[command(version)]
#[command(author = "FundWatch Contributors")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Settings file to use instead of the default.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Quiet mode (minimal output).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

impl Cli {
    /// Settings file in effect.
    pub fn settings_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_settings_path)
    }

    /// Loads the settings in effect.
    pub async fn load_settings(&self) -> Result<Settings> {
        Ok(Settings::load(&self.settings_path()).await?)
    }
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Fetch one or more projects.
    #[command(visible_alias = "f")]
    Fetch(fetch::FetchArgs),

    /// Fetch a list of projects with a worker pool.
    #[command(visible_alias = "b")]
    Batch(batch::BatchArgs),

    /// Sign an API call, optionally sending it.
    Sign(sign::SignArgs),

    /// Inspect or clear the response cache.
    Cache(cache::CacheArgs),

    /// Manage configuration.
    Config(config::ConfigArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text with colors.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool, quiet: bool, level: LogLevel) {
    if quiet {
        return; // No logging in quiet mode
    }

    let filter = if verbose {
        EnvFilter::new("fundwatch=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("fundwatch={level}")))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Settings are read again by each command; here only the level matters.
    let level = match Settings::load(&cli.settings_path()).await {
        Ok(settings) => settings.log_level,
        Err(_) => LogLevel::default(),
    };
    setup_logging(cli.verbose, cli.quiet, level);

    let result = match &cli.command {
        Commands::Fetch(args) => fetch::run(args, &cli).await,
        Commands::Batch(args) => batch::run(args, &cli).await,
        Commands::Sign(args) => sign::run(args, &cli).await,
        Commands::Cache(args) => cache::run(args, &cli).await,
        Commands::Config(args) => config::run(args, &cli).await,
    };

    let code = match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::Error
        }
    };

    std::process::exit(code as i32);
}
