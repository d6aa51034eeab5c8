//! `parley` binary: parses the command line, sets up logging, and runs the
//! server until interrupted.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley::{DEFAULT_PORT, DatagramConfig, ParleyServer};

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Chat server for stream and datagram clients")]
struct Args {
    /// Address or hostname to listen on
    #[arg(short = 'l', long = "listen")]
    listen: String,

    /// Port for both the stream and the datagram listener
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Datagram confirmation timeout in milliseconds
    #[arg(short = 'd', long = "timeout", default_value_t = 250)]
    timeout_ms: u64,

    /// Datagram retransmissions before a peer is declared unreachable
    #[arg(short = 'r', long = "retries", default_value_t = 3)]
    max_retries: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "server stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %args.listen,
        port = args.port,
        "starting parley"
    );

    let server = ParleyServer::builder()
        .bind(&args.listen)
        .port(args.port)
        .datagram(DatagramConfig {
            timeout: Duration::from_millis(args.timeout_ms),
            max_retries: args.max_retries,
        })
        .build()
        .await
        .with_context(|| format!("failed to start on {}:{}", args.listen, args.port))?;

    tokio::select! {
        result = server.run() => result.context("server failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted, shutting down");
        }
    }
    Ok(())
}

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
