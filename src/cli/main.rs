//! Polar host CLI
//!
//! Loads policy files into the native engine and prints the solutions of a query.

use polar_host::config::SessionConfig;
use polar_host::{HostValue, PolicySession};

use anyhow::Context;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Polar host CLI
#[derive(Parser, Debug)]
#[command(name = "polar-host")]
#[command(about = "Evaluate Polar queries against policy files")]
#[command(version)]
struct Args {
    /// Query to run, in policy syntax
    #[arg(short, long)]
    query: String,

    /// Policy files to load (`.polar`)
    #[arg(short = 'f', long = "policy", env = "POLAR_HOST_POLICY_FILES", value_delimiter = ',')]
    policy_files: Vec<PathBuf>,

    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Bind a variable before running the query, as `name=json`
    #[arg(short, long = "bind")]
    bindings: Vec<String>,

    /// Stop after this many solutions
    #[arg(short, long)]
    limit: Option<usize>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Disable the method-resolution cache
    #[arg(long)]
    no_cache: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::from_env()?,
    };

    // Apply command line overrides
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json = true;
    }
    if args.no_cache {
        config.cache.enabled = false;
    }
    config.validate()?;

    init_logging(&config.logging.level, config.logging.json)?;
    info!("Starting polar-host v{}", polar_host::VERSION);

    let session = PolicySession::builder()
        .with_config(config)
        .build()
        .context("failed to start the policy engine")?;
    if !args.policy_files.is_empty() {
        session.load_files(&args.policy_files)?;
    }

    let bindings = parse_bindings(&args.bindings)?;
    let query = session.evaluate_str(&args.query, bindings)?;

    let mut count = 0;
    for result in query.take(args.limit.unwrap_or(usize::MAX)) {
        let result = result?;
        println!("{}", serde_json::to_string(&result.to_json())?);
        count += 1;
    }
    if count == 0 {
        warn!(query = %args.query, "no solutions");
        println!("false");
    }

    let metrics = session.metrics();
    info!(
        solutions = count,
        instances = metrics.live_instances,
        "query finished"
    );
    Ok(())
}

/// Initialize the logging system.
fn init_logging(level: &str, json_format: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Parse `name=json` pairs into host values.
fn parse_bindings(pairs: &[String]) -> anyhow::Result<HashMap<String, HostValue>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, raw) = pair
                .split_once('=')
                .with_context(|| format!("binding {:?} is not name=json", pair))?;
            let json: serde_json::Value = serde_json::from_str(raw)
                .or_else(|_| serde_json::from_str(&format!("{:?}", raw)))
                .with_context(|| format!("binding {:?} has an unreadable value", name))?;
            Ok((name.to_string(), from_json(json)?))
        })
        .collect()
}

fn from_json(json: serde_json::Value) -> anyhow::Result<HostValue> {
    use serde_json::Value;
    Ok(match json {
        Value::Bool(b) => HostValue::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => HostValue::Integer(i),
            None => HostValue::Float(n.as_f64().context("number out of range")?),
        },
        Value::String(s) => HostValue::String(s),
        Value::Array(items) => HostValue::List(
            items
                .into_iter()
                .map(from_json)
                .collect::<anyhow::Result<_>>()?,
        ),
        Value::Object(fields) => HostValue::Map(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, from_json(v)?)))
                .collect::<anyhow::Result<_>>()?,
        ),
        Value::Null => anyhow::bail!("null has no policy representation"),
    })
}
