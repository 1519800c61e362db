//! Sign command - compute, and optionally send, a signed API call.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use fundwatch_modian::{APP_KEY, current_mt, sign};
use reqwest::Method;
use std::collections::BTreeMap;

use super::Services;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, OutputFormat};

/// Arguments for the sign command.
#[derive(Args)]
pub struct SignArgs {
    /// API path (e.g. `/p/get_project_limit_status`) or absolute URL.
    pub url: String,

    /// Parameters as `key=value`.
    pub params: Vec<String>,

    /// HTTP method.
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Request time in unix seconds instead of now.
    #[arg(long)]
    pub mt: Option<i64>,

    /// Send the request with the configured identity and print the response.
    #[arg(long)]
    pub send: bool,
}

/// Runs the sign command.
pub async fn run(args: &SignArgs, cli: &Cli) -> Result<()> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method: {}", args.method))?;
    let params = parse_params(&args.params)?;

    if args.send {
        return send(args, method, &params, cli).await;
    }

    let mt = args.mt.unwrap_or_else(current_mt);
    let signed = sign(&args.url, &method, &params, APP_KEY, mt)?;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_signed(&signed));
        }
        OutputFormat::Json => {
            println!("{}", JsonFormatter::new(cli.pretty).format(&signed)?);
        }
    }

    Ok(())
}

async fn send(
    args: &SignArgs,
    method: Method,
    params: &BTreeMap<String, String>,
    cli: &Cli,
) -> Result<()> {
    let settings = cli.load_settings().await?;
    let services = Services::build(settings, false)?;
    let identity = services.identity();

    let response = services
        .client
        .authenticated_request(&args.url, method, params, identity.as_ref())
        .await?;

    match cli.format {
        OutputFormat::Text => {
            if cli.verbose {
                eprintln!("HTTP {} ({:.2}s)", response.status, response.elapsed.as_secs_f64());
            }
            println!("{}", response.text());
        }
        OutputFormat::Json => {
            let body = response
                .json::<serde_json::Value>()
                .unwrap_or_else(|_| serde_json::Value::String(response.text()));
            let output = serde_json::json!({
                "status": response.status,
                "body": body,
            });
            println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
        }
    }

    Ok(())
}

/// Parses `key=value` pairs. Later keys replace earlier ones.
fn parse_params(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected key=value, got '{pair}'"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(anyhow!("Empty key in '{pair}'"));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}
