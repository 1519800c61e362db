//! Config command - manage configuration.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use fundwatch_store::{Settings, default_config_dir, default_records_path};
use tracing::info;

use crate::output::JsonFormatter;
use crate::{Cli, OutputFormat};

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration.
    Show,

    /// Show configuration paths.
    Path,

    /// List settable keys.
    Keys,

    /// Write a settings file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Set one value.
    Set {
        /// Setting key (see `config keys`).
        key: String,
        /// New value. Empty clears optional values.
        value: String,
    },

    /// Reset to defaults.
    Reset,
}

/// Runs the config command.
pub async fn run(args: &ConfigArgs, cli: &Cli) -> Result<()> {
    match &args.action {
        ConfigAction::Show => show_config(cli).await,
        ConfigAction::Path => show_paths(cli).await,
        ConfigAction::Keys => show_keys(cli),
        ConfigAction::Init { force } => init_config(*force, cli).await,
        ConfigAction::Set { key, value } => set_value(key, value, cli).await,
        ConfigAction::Reset => reset_config(cli).await,
    }
}

async fn show_config(cli: &Cli) -> Result<()> {
    let settings = cli.load_settings().await?;

    match cli.format {
        OutputFormat::Text => {
            println!("FundWatch Configuration");
            println!("{}", "─".repeat(40));
            println!();
            println!("Workers:            {}", settings.max_concurrent_requests);
            println!(
                "Request delay:      {:.1}-{:.1}s",
                settings.request_delay.0, settings.request_delay.1
            );
            println!("Request timeout:    {}s", settings.request_timeout_secs);
            println!();
            println!("Cache dir:          {}", settings.cache_dir.display());
            println!("Cache limit:        {} MiB", settings.cache_max_mb);
            println!("Cache max age:      {}s", settings.cache_max_age_secs);
            println!();
            println!("Monitor interval:   {}s", settings.monitor_interval_secs);
            println!("Adaptive tuning:    {}", settings.tuning_enabled);
            println!("Browser fallback:   {}", settings.browser_fallback);
            println!("Browser attempts:   {}", settings.browser_attempts);
            println!();
            println!("User token:         {}", mask(settings.user_token.as_deref()));
            println!("User id:            {}", settings.user_id.as_deref().unwrap_or("(not set)"));
            println!("Log level:          {}", settings.log_level);
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            let mut settings = settings;
            settings.user_token = settings.user_token.as_deref().map(|t| mask(Some(t)));
            println!("{}", formatter.format(&settings)?);
        }
    }

    Ok(())
}

async fn show_paths(cli: &Cli) -> Result<()> {
    let settings = cli.load_settings().await?;
    let config_dir = default_config_dir();
    let settings_path = cli.settings_path();
    let records_path = default_records_path();
    let cache_path = settings.cache_db_path();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration Paths");
            println!("{}", "─".repeat(40));
            println!();
            println!("Config dir:    {}", config_dir.display());
            println!("Settings file: {}", settings_path.display());
            println!("Records file:  {}", records_path.display());
            println!("Cache file:    {}", cache_path.display());
        }
        OutputFormat::Json => {
            let paths = serde_json::json!({
                "config_dir": config_dir.display().to_string(),
                "settings_file": settings_path.display().to_string(),
                "records_file": records_path.display().to_string(),
                "cache_file": cache_path.display().to_string(),
            });
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&paths)?);
        }
    }

    Ok(())
}

fn show_keys(cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Text => {
            for key in Settings::KEYS {
                println!("{key}");
            }
        }
        OutputFormat::Json => {
            println!("{}", JsonFormatter::new(cli.pretty).format(&Settings::KEYS)?);
        }
    }
    Ok(())
}

async fn init_config(force: bool, cli: &Cli) -> Result<()> {
    let path = cli.settings_path();
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Settings::default().save(&path).await?;
    info!(path = %path.display(), "Wrote default settings");
    if !cli.quiet {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

async fn set_value(key: &str, value: &str, cli: &Cli) -> Result<()> {
    let path = cli.settings_path();
    let mut settings = cli.load_settings().await?;
    settings.set(key, value)?;
    settings.save(&path).await?;

    info!(key, "Setting updated");
    if !cli.quiet {
        println!("Set {key}");
    }
    Ok(())
}

async fn reset_config(cli: &Cli) -> Result<()> {
    let path = cli.settings_path();
    Settings::default().save(&path).await?;
    info!("Configuration reset to defaults");
    if !cli.quiet {
        println!("Configuration reset to defaults");
    }
    Ok(())
}

/// Shows only the last four characters of a secret.
fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "(not set)".to_string(),
        Some(s) if s.chars().count() <= 4 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{tail}")
        }
    }
}
