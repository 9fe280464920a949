//! huginn — request optimizer CLI
//!
//! Exercise an API through the optimizer and inspect what it did.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use huginn::{BuildInfo, Huginn, Method, Optimizer, OptimizerConfig, PrefetchRule};

/// Huginn request optimizer
#[derive(Parser)]
#[command(name = "huginn")]
#[command(version = huginn::PKG_VERSION)]
#[command(about = "Cache, throttle and coalesce requests to an HTTP API")]
struct Args {
    /// API base URL
    #[arg(
        short,
        long,
        env = "HUGINN_BASE_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    base_url: String,

    /// Config file (default: ~/.huginn/config.toml, then /etc/huginn/config.toml)
    #[arg(short, long, env = "HUGINN_CONFIG")]
    config: Option<PathBuf>,

    /// Print request statistics as JSON when done
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a request
    Send {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: Method,
        /// Request path or absolute URL
        url: String,
        /// JSON body (or omit to read from stdin for mutations)
        #[arg(short, long)]
        data: Option<String>,
        /// Send the same request this many times concurrently
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,
    },

    /// Warm endpoints for a location
    Prefetch {
        /// Location the endpoints belong to
        location: String,
        /// Endpoint templates (`{id}` resolves to the location's last segment)
        #[arg(required = true)]
        endpoints: Vec<String>,
    },

    /// Show the effective configuration
    Config,

    /// Show version information
    Version {
        /// Print build metadata as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = OptimizerConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Version { json } => {
            let info = BuildInfo::current();
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("huginn {}", info.version_string());
            }
            return Ok(());
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        _ => {}
    }

    let api = Huginn::builder()
        .http(&args.base_url)
        .config(config)
        .build()?;

    match args.command {
        Command::Send {
            method,
            url,
            data,
            repeat,
        } => {
            let body = resolve_body(method, data)?;
            send(&api, method, &url, body, repeat.max(1)).await?;
        }

        Command::Prefetch {
            location,
            endpoints,
        } => {
            let rules = [PrefetchRule::exact(&location, endpoints)];
            let report = api.prefetch(&rules, &location).finished().await;
            println!(
                "issued: {}, failed: {}, skipped: {}",
                report.issued, report.failed, report.skipped
            );
        }

        Command::Config | Command::Version { .. } => return Ok(()),
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&api.stats())?);
    }
    Ok(())
}

async fn send(
    api: &Optimizer,
    method: Method,
    url: &str,
    body: Option<serde_json::Value>,
    repeat: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let calls = (0..repeat).map(|_| {
        let api = api.clone();
        let body = body.clone();
        let url = url.to_string();
        tokio::spawn(async move { api.request(method, &url, body).await })
    });
    let handles: Vec<_> = calls.collect();

    let mut last = None;
    for handle in handles {
        last = Some(handle.await??);
    }
    if let Some(response) = last {
        println!("status: {}", response.status);
        println!("{}", serde_json::to_string_pretty(&response.body)?);
    }
    Ok(())
}

/// Parse `--data`, or read it from stdin for mutations when piped.
fn resolve_body(
    method: Method,
    data: Option<String>,
) -> Result<Option<serde_json::Value>, Box<dyn std::error::Error>> {
    let raw = match data {
        Some(data) => data,
        None if method.is_mutation() && !io::stdin().is_terminal() => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
        None => return Ok(None),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&raw)?))
}
