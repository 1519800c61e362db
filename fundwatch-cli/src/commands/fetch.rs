//! Fetch command - fetch individual projects.

use anyhow::Result;
use clap::Args;
use fundwatch_fetch::WorkerId;
use tracing::info;

use super::Services;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the fetch command.
#[derive(Args)]
pub struct FetchArgs {
    /// Project ids to fetch.
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Never start a browser for zero counters.
    #[arg(long)]
    pub no_browser: bool,

    /// Show reward tiers.
    #[arg(long, short)]
    pub tiers: bool,
}

/// Runs the fetch command.
pub async fn run(args: &FetchArgs, cli: &Cli) -> Result<()> {
    let settings = cli.load_settings().await?;
    let services = Services::build(settings, !args.no_browser)?;

    let mut records = Vec::with_capacity(args.ids.len());
    for id in &args.ids {
        records.push(services.fetcher.fetch(WorkerId(0), id).await);
    }
    services.fetcher.shutdown().await;

    let defaulted = records.iter().filter(|r| r.is_default()).count();
    info!(fetched = records.len(), defaulted, "Fetch finished");

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            let blocks: Vec<String> = records
                .iter()
                .map(|r| formatter.format_record(r, args.tiers))
                .collect();
            println!("{}", blocks.join("\n\n"));

            if cli.verbose {
                println!();
                println!(
                    "{}",
                    formatter.format_request_stats(
                        &services.gateway.stats().await,
                        &services.recovery.stats().await
                    )
                );
            }
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            if let [record] = records.as_slice() {
                println!("{}", formatter.format(record)?);
            } else {
                println!("{}", formatter.format(&records)?);
            }
        }
    }

    Ok(())
}
