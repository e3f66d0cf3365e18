//! CLI Entry Point for optogama-mex
//!
//! Talks to one beam expander over its serial port:
//! - Read and write the four numeric parameters
//! - Poll the status word (state and limit switches)
//! - Send raw protocol lines for diagnostics
//!
//! # Usage
//!
//! ```bash
//! optogama-mex --port /dev/ttyUSB3 get wavelength
//! optogama-mex set magnification 2.5
//! optogama-mex watch --interval-ms 500
//! optogama-mex query "MEX>CWL?"
//! ```
//!
//! The port defaults to `/dev/ttyMEX` and can also be set with `MEX_PORT`.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use optogama_mex::store::PARAMETER_TABLE;
use optogama_mex::{logging, MexConfig, ParameterStore};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "optogama-mex")]
#[command(about = "Control an Optogama MEX motorized beam expander over serial", long_about = None)]
struct Cli {
    /// Serial port (overrides MEX_PORT)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Log level (overrides MEX_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format: compact, pretty or json (overrides MEX_LOG_FORMAT)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a parameter (wavelength, magnification, mag_offset, divergence)
    Get {
        name: String,
    },

    /// Write a parameter
    Set {
        name: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Query the status word once
    Status,

    /// Poll the status word periodically until Ctrl+C
    Watch {
        /// Polling interval in milliseconds
        #[arg(long, default_value = "500")]
        interval_ms: u64,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<u64>,
    },

    /// Send a raw protocol line and print the reply
    Query {
        command: String,
    },

    /// List the known parameters
    Params,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MexConfig::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    if let Commands::Params = cli.command {
        list_parameters();
        return Ok(());
    }

    let transport = optogama_mex::Transport::open(&config.serial())
        .await
        .with_context(|| format!("Cannot open beam expander on {}", config.port))?;
    let store = ParameterStore::with_debounce(transport, config.status_debounce());

    let result = run(&store, cli.command).await;

    // close on every exit path; the command error wins over a close error
    let closed = store.close().await;
    result?;
    closed.context("Failed to close serial port")
}

async fn run(store: &ParameterStore, command: Commands) -> Result<()> {
    match command {
        Commands::Get { name } => {
            let value = store.get(&name).await?;
            println!("{}", value);
        }
        Commands::Set { name, value } => {
            store.set(&name, value).await?;
            tracing::info!(%name, value, "parameter written");
        }
        Commands::Status => {
            store.refresh_status(Instant::now()).await?;
            print_status(store);
        }
        Commands::Watch { interval_ms, count } => {
            watch(store, Duration::from_millis(interval_ms), count).await?;
        }
        Commands::Query { command } => {
            let reply = store.query_raw(&command).await?;
            println!("{}", reply);
        }
        Commands::Params => list_parameters(),
    }
    Ok(())
}

async fn watch(store: &ParameterStore, interval: Duration, count: Option<u64>) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let mut polls = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                store.refresh_status(Instant::now()).await?;
                print_status(store);
                polls += 1;
                if count.is_some_and(|n| polls >= n) {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(polls, "watch interrupted");
                return Ok(());
            }
        }
    }
}

fn print_status(store: &ParameterStore) {
    if let Some(snapshot) = store.snapshot() {
        println!(
            "state={} status={} limit_low={} limit_high={}",
            snapshot.state(),
            snapshot.status,
            snapshot.limit_low,
            snapshot.limit_high
        );
    }
}

fn list_parameters() {
    for (name, tag) in PARAMETER_TABLE {
        let unit = tag.unit().unwrap_or("-");
        println!("{:<14} {}  {:<4} {}", name, tag, unit, tag.label());
    }
}
