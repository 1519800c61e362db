//! Cache command - inspect and maintain the response cache.

use anyhow::Result;
use clap::{Args, Subcommand};
use fundwatch_fetch::ResponseCache;
use tracing::info;

use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the cache command.
#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheAction {
    /// Show entry count and size.
    Stats,

    /// Remove entries older than the configured freshness window.
    Purge,

    /// Remove every entry.
    Clear,
}

/// Runs the cache command.
pub async fn run(args: &CacheArgs, cli: &Cli) -> Result<()> {
    let settings = cli.load_settings().await?;
    let path = settings.cache_db_path();
    let cache = ResponseCache::open(&path, settings.cache_max_bytes())?;

    match &args.action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            match cli.format {
                OutputFormat::Text => {
                    println!("Response Cache");
                    println!("{}", "─".repeat(40));
                    println!("Path:    {}", path.display());
                    println!("{}", TextFormatter::new(!cli.no_color).format_cache_stats(&stats));
                }
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "path": path.display().to_string(),
                        "stats": stats,
                    });
                    println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
                }
            }
        }
        CacheAction::Purge => {
            let removed = cache.purge_expired(settings.cache_max_age())?;
            info!(removed, "Purged expired cache entries");
            report_removed(removed, "expired", cli)?;
        }
        CacheAction::Clear => {
            let removed = cache.clear()?;
            info!(removed, "Cleared response cache");
            report_removed(removed, "all", cli)?;
        }
    }

    Ok(())
}

fn report_removed(removed: usize, scope: &str, cli: &Cli) -> Result<()> {
    match cli.format {
        OutputFormat::Text => println!("Removed {removed} cache entries ({scope})"),
        OutputFormat::Json => {
            let output = serde_json::json!({ "removed": removed, "scope": scope });
            println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
        }
    }
    Ok(())
}
