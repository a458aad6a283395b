//! `threescale` - talk to the 3scale metering backend from a shell.
//!
//! # Examples
//!
//! ```bash
//! # Authorize an application
//! threescale --provider-key pk authorize --app-id foo --app-key bar --usage hits=1
//!
//! # Authorize by user key with a service token
//! threescale --service-token st --service-id 42 authorize --user-key uk
//!
//! # Authorize and report in one call
//! threescale authrep --user-key uk --usage hits=1 --no-body
//!
//! # Report a batch
//! threescale report -t user_key=foo,hits=1,timestamp=1272375737 -t app_id=bar,hits=2
//! ```
//!
//! Results are printed as JSON. The exit status is 0 when the backend
//! accepted the call, 2 when it answered with an error, 1 on any failure to
//! get an answer.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use threescale_core::{
    AuthrepOptions, ClientConfig, Credentials, Principal, Response, ThreeScaleClient, Timestamp,
    Transaction, UreqTransport, Usage,
};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "threescale")]
#[command(about = "Authorize and report usage against the 3scale backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Backend base URL. Defaults to http://server.3scale.net.
    #[arg(long, env = "THREESCALE_BACKEND_URL", global = true)]
    base_url: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,

    #[arg(long, env = "THREESCALE_PROVIDER_KEY", global = true, hide_env_values = true)]
    provider_key: Option<String>,

    #[arg(long, env = "THREESCALE_SERVICE_ID", global = true)]
    service_id: Option<String>,

    /// Takes precedence over --provider-key. Requires --service-id.
    #[arg(long, env = "THREESCALE_SERVICE_TOKEN", global = true, hide_env_values = true)]
    service_token: Option<String>,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,

    /// Log requests to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether a call is allowed without recording usage.
    Authorize(AuthorizeArgs),

    /// Authorize an OAuth client and fetch its application key.
    OauthAuthorize(OAuthArgs),

    /// Authorize and, if allowed, record usage.
    Authrep(AuthrepArgs),

    /// Record a batch of transactions.
    Report(ReportArgs),
}

#[derive(Debug, Args)]
struct PrincipalArgs {
    #[arg(long, conflicts_with = "user_key", required_unless_present = "user_key")]
    app_id: Option<String>,

    #[arg(long, requires = "app_id")]
    app_key: Option<String>,

    #[arg(long)]
    user_key: Option<String>,
}

#[derive(Debug, Args)]
struct AuthorizeArgs {
    #[command(flatten)]
    principal: PrincipalArgs,

    /// Predicted usage, repeatable.
    #[arg(long = "usage", value_name = "METRIC=VALUE", value_parser = parse_usage_pair)]
    usage: Vec<(String, i64)>,
}

#[derive(Debug, Args)]
struct OAuthArgs {
    #[arg(long)]
    app_id: String,

    #[arg(long)]
    access_token: Option<String>,

    #[arg(long = "usage", value_name = "METRIC=VALUE", value_parser = parse_usage_pair)]
    usage: Vec<(String, i64)>,
}

#[derive(Debug, Args)]
struct AuthrepArgs {
    #[command(flatten)]
    principal: PrincipalArgs,

    #[arg(long = "usage", value_name = "METRIC=VALUE", value_parser = parse_usage_pair)]
    usage: Vec<(String, i64)>,

    /// End user on whose behalf the call is made.
    #[arg(long)]
    user_id: Option<String>,

    #[arg(long)]
    object: Option<String>,

    /// Ask the backend to skip the response body.
    #[arg(long)]
    no_body: bool,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// One transaction as comma-separated key=value pairs. `app_id`,
    /// `app_key`, `user_key` and `timestamp` are fields, any other key is a
    /// metric.
    #[arg(
        long = "transaction",
        short = 't',
        value_name = "FIELDS",
        required = true,
        value_parser = parse_transaction
    )]
    transactions: Vec<Transaction>,
}

// ============================================================================
// Argument parsing
// ============================================================================

fn parse_usage_pair(raw: &str) -> Result<(String, i64), String> {
    let (metric, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected METRIC=VALUE, got {raw:?}"))?;
    let metric = metric.trim();
    if metric.is_empty() {
        return Err(format!("missing metric name in {raw:?}"));
    }
    let value = value
        .trim()
        .parse()
        .map_err(|_| format!("usage value for {metric:?} must be an integer"))?;
    Ok((metric.to_string(), value))
}

fn parse_transaction(raw: &str) -> Result<Transaction, String> {
    let mut app_id = None;
    let mut app_key = None;
    let mut user_key = None;
    let mut timestamp = None;
    let mut usage = Usage::new();

    for field in raw.split(',').filter(|f| !f.trim().is_empty()) {
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got {field:?}"))?;
        let value = value.trim().to_string();
        match key.trim() {
            "app_id" => app_id = Some(value),
            "app_key" => app_key = Some(value),
            "user_key" => user_key = Some(value),
            "timestamp" => timestamp = Some(parse_timestamp(value)),
            _ => {
                let (metric, delta) = parse_usage_pair(field)?;
                usage.insert(metric, delta);
            }
        }
    }

    let principal = match (app_id, user_key) {
        (Some(app_id), None) => match app_key {
            Some(key) => Principal::app_id_with_key(app_id, key),
            None => Principal::app_id(app_id),
        },
        (None, Some(user_key)) => Principal::user_key(user_key),
        (Some(_), Some(_)) => return Err("give either app_id or user_key, not both".to_string()),
        (None, None) => return Err("transaction needs app_id or user_key".to_string()),
    }
    .map_err(|e| e.to_string())?;

    let transaction = Transaction::new(principal, usage);
    Ok(match timestamp {
        Some(timestamp) => transaction.at(timestamp),
        None => transaction,
    })
}

/// Whole numbers are epoch seconds, anything else is passed through.
fn parse_timestamp(raw: String) -> Timestamp {
    match raw.parse::<i64>() {
        Ok(secs) => Timestamp::Epoch(secs),
        Err(_) => Timestamp::Raw(raw),
    }
}

impl PrincipalArgs {
    fn to_principal(&self) -> Result<Principal> {
        let principal = match (&self.app_id, &self.app_key, &self.user_key) {
            (Some(app_id), Some(key), _) => Principal::app_id_with_key(app_id.as_str(), key.as_str())?,
            (Some(app_id), None, _) => Principal::app_id(app_id.as_str())?,
            (None, _, Some(user_key)) => Principal::user_key(user_key.as_str())?,
            (None, _, None) => bail!("either --app-id or --user-key is required"),
        };
        Ok(principal)
    }
}

fn usage_from(pairs: &[(String, i64)]) -> Option<Usage> {
    (!pairs.is_empty()).then(|| pairs.iter().map(|(m, v)| (m.as_str(), *v)).collect())
}

impl Cli {
    fn credentials(&self) -> Result<Credentials> {
        if let Some(token) = &self.service_token {
            let Some(service_id) = &self.service_id else {
                bail!("--service-token needs --service-id");
            };
            return Ok(Credentials::service_token(token.as_str(), service_id.as_str())?);
        }
        match (&self.provider_key, &self.service_id) {
            (Some(key), Some(service_id)) => {
                Ok(Credentials::provider_key_for_service(key.as_str(), service_id.as_str())?)
            }
            (Some(key), None) => Ok(Credentials::provider_key(key.as_str())?),
            (None, _) => bail!("either --provider-key or --service-token is required"),
        }
    }

    fn client(&self) -> Result<ThreeScaleClient<UreqTransport>> {
        let mut config = ClientConfig::from_env().context("reading client configuration")?;
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        debug!(base_url = %config.base_url, timeout = ?config.timeout, "client configured");
        Ok(config.build())
    }
}

// ============================================================================
// Logging Setup
// ============================================================================

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("threescale_core=debug,threescale=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
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

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the backend accepted the call.
fn run(cli: &Cli) -> Result<bool> {
    let credentials = cli.credentials()?;
    let client = cli.client()?;

    match &cli.command {
        Command::Authorize(args) => {
            let principal = args.principal.to_principal()?;
            let usage = usage_from(&args.usage);
            let response = client.authorize(&principal, &credentials, usage.as_ref())?;
            print(&response, cli.pretty)
        }
        Command::OauthAuthorize(args) => {
            let principal = match &args.access_token {
                Some(token) => Principal::oauth_with_token(args.app_id.as_str(), token.as_str())?,
                None => Principal::oauth(args.app_id.as_str())?,
            };
            let usage = usage_from(&args.usage);
            let response = client.oauth_authorize(&principal, &credentials, usage.as_ref())?;
            print(&response, cli.pretty)
        }
        Command::Authrep(args) => {
            let principal = args.principal.to_principal()?;
            let usage = usage_from(&args.usage);
            let options = AuthrepOptions {
                user_id: args.user_id.clone(),
                object: args.object.clone(),
                no_body: args.no_body,
            };
            let response =
                client.authorize_and_report(&principal, &credentials, usage.as_ref(), &options)?;
            print(&response, cli.pretty)
        }
        Command::Report(args) => {
            let response = client.report(&args.transactions, &credentials)?;
            print(&response, cli.pretty)
        }
    }
}

fn print<T: Serialize>(response: &Response<T>, pretty: bool) -> Result<bool> {
    let json = if pretty {
        serde_json::to_string_pretty(response)?
    } else {
        serde_json::to_string(response)?
    };
    println!("{json}");
    Ok(response.is_success())
}
