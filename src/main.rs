use anyhow::{anyhow, Context};
use beeper_cli::api_error::friendly_transport_error;
use beeper_cli::observability::init_tracing;
use beeper_cli::{BeeperClient, CancellationToken, ClientConfig};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::Method;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tracing::debug;

#[derive(Parser)]
#[command(name = "beeper", version)]
#[command(about = "CLI for Beeper Desktop", long_about = "A command-line interface for Beeper Desktop's local API.")]
struct Cli {
    /// Configuration file (defaults to <config dir>/beeper-cli/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the local API
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Per-attempt request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable debug logging for API requests
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path and print the response body
    Get { path: String },
    /// POST a JSON body to a path
    Post {
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
    /// DELETE a path
    Delete { path: String },
    /// Send a request with any method
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

impl Commands {
    fn into_parts(self) -> anyhow::Result<(Method, String, Option<String>)> {
        Ok(match self {
            Commands::Get { path } => (Method::GET, path, None),
            Commands::Post { path, data } => (Method::POST, path, data),
            Commands::Delete { path } => (Method::DELETE, path, None),
            Commands::Request { method, path, data } => {
                let method = Method::from_bytes(method.to_uppercase().as_bytes())
                    .with_context(|| format!("invalid HTTP method '{}'", method))?;
                (method, path, data)
            }
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    config.debug |= cli.debug;

    if let Err(e) = init_tracing(config.debug) {
        eprintln!("{}", e);
    }
    config.validate()?;

    let (method, path, data) = cli.command.into_parts()?;
    let body = data
        .map(|raw| {
            serde_json::from_str::<serde_json::Value>(&raw)
                .context("--data must be valid JSON")
                .map(|_| Bytes::from(raw))
        })
        .transpose()?;

    let client = BeeperClient::new(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let response = client
        .send(&cancel, method, &path, body)
        .await
        .map_err(|e| anyhow!(friendly_transport_error(&e)))?;

    if !response.is_success() {
        return Err(anyhow!(response.user_message(None)));
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&response.body)?;
    if !response.body.ends_with(b"\n") && !response.body.is_empty() {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
