//! Batch command - fetch many projects with a worker pool.

use anyhow::{Context, Result, bail};
use clap::Args;
use fundwatch_modian::BatchRunner;
use fundwatch_store::{JsonRecordStore, SharedConfig, default_records_path};
use fundwatch_telemetry::{AdaptiveTuner, FetchWorkload, TelemetryMonitor};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

use super::Services;
use crate::output::{BatchOutput, JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Project ids, in addition to any read from a file.
    pub ids: Vec<String>,

    /// File with project ids, one per line. Blank lines and `#` comments are skipped.
    #[arg(long, short = 'i', value_name = "PATH")]
    pub ids_file: Option<PathBuf>,

    /// Record store to write to.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Worker count, overriding the configured value.
    #[arg(long, short)]
    pub workers: Option<usize>,

    /// Never start a browser for zero counters.
    #[arg(long)]
    pub no_browser: bool,

    /// Run without the resource monitor and tuner.
    #[arg(long)]
    pub no_monitor: bool,
}

/// Runs the batch command.
pub async fn run(args: &BatchArgs, cli: &Cli) -> Result<()> {
    let mut ids = args.ids.clone();
    if let Some(path) = &args.ids_file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        ids.extend(parse_ids(&contents));
    }
    let ids = dedupe(ids);
    if ids.is_empty() {
        bail!("No project ids given");
    }

    let settings = cli.load_settings().await?;
    let mut runtime = settings.runtime_config();
    if let Some(workers) = args.workers {
        runtime.max_concurrent_requests = workers.max(1);
    }
    let shared = SharedConfig::new(runtime);

    let monitor_interval = settings.monitor_interval();
    let tuning_enabled = settings.tuning_enabled;
    let services = Services::build(settings, !args.no_browser)?;

    let store_path = args.output.clone().unwrap_or_else(default_records_path);
    let store = JsonRecordStore::open(&store_path).await;

    // Monitoring
    let tuner = Arc::new(AdaptiveTuner::new());
    if !tuning_enabled {
        tuner.disable();
    }
    let monitor = if args.no_monitor {
        None
    } else {
        match TelemetryMonitor::system() {
            Ok(monitor) => Some(Arc::new(
                monitor
                    .with_workload(Arc::new(FetchWorkload::new(
                        Arc::clone(&services.gateway),
                        Arc::clone(&services.recovery),
                    )))
                    .with_tuner(Arc::clone(&tuner), shared.clone()),
            )),
            Err(e) => {
                warn!(error = %e, "Resource monitor unavailable");
                None
            }
        }
    };
    let monitor_task = monitor.as_ref().map(|monitor| {
        let monitor = Arc::clone(monitor);
        let stop = Arc::clone(&services.stop);
        tokio::spawn(async move { monitor.run(monitor_interval, stop).await })
    });

    // Ctrl-C sets the shared stop flag; in-flight items finish, queued ones are dropped.
    let interrupt_stop = Arc::clone(&services.stop);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after in-flight projects");
            interrupt_stop.store(true, Ordering::SeqCst);
        }
    });

    info!(
        projects = ids.len(),
        workers = shared.snapshot().max_concurrent_requests,
        store = %store_path.display(),
        "Starting batch"
    );
    let runner = BatchRunner::new(Arc::clone(&services.fetcher), shared)
        .with_stop_flag(Arc::clone(&services.stop));
    let report = runner.run(ids, &store).await;

    interrupt.abort();
    if let Some(task) = monitor_task {
        task.abort();
    }
    services.fetcher.shutdown().await;

    let performance = match &monitor {
        Some(monitor) => Some(monitor.performance_report().await),
        None => None,
    };
    let tuning = if monitor.is_some() {
        Some(tuner.tuning_report().await)
    } else {
        None
    };
    let requests = services.gateway.stats().await;
    let recovery = services.recovery.stats().await;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_batch_report(&report));
            println!("Records:        {}", store_path.display());
            if cli.verbose {
                println!();
                println!("{}", formatter.format_request_stats(&requests, &recovery));
                if let Some(performance) = &performance {
                    println!();
                    println!("{}", formatter.format_performance(performance));
                }
                if let Some(tuning) = &tuning {
                    println!();
                    println!("{}", formatter.format_tuning(tuning));
                }
            }
        }
        OutputFormat::Json => {
            let output = BatchOutput {
                elapsed_secs: report.elapsed.as_secs_f64(),
                report,
                requests,
                recovery,
                performance,
                tuning,
            };
            println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
        }
    }

    Ok(())
}

/// Extracts ids from file contents.
fn parse_ids(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drops repeated ids, keeping the first occurrence.
fn dedupe(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids_skips_comments_and_blanks() {
        let contents = "# launch list\n147002\n\n  147003  # flagship\n147004,147005\n";
        assert_eq!(parse_ids(contents), vec!["147002", "147003", "147004", "147005"]);
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let ids = vec!["3".to_string(), "1".to_string(), "3".to_string(), "2".to_string()];
        assert_eq!(dedupe(ids), vec!["3", "1", "2"]);
    }

    #[tokio::test]
    async fn test_ids_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        tokio::fs::write(&path, "10\n11\n10\n").await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(dedupe(parse_ids(&contents)), vec!["10", "11"]);
    }
}
