//! Bridge Worker - Depot Verification Worker Process
//!
//! Started by the host with a connection id. Connects back over a named-pipe
//! pair or a loopback TCP socket, serves `VerifyFiles` requests and exits
//! when the host quits or closes the stream.
//!
//! # Usage
//!
//! ```bash
//! # Socket mode: connect to 127.0.0.1:<port>
//! bridge-worker 41234
//!
//! # Pipe mode: connect to <name>, serve <name>_reply
//! bridge-worker depot-7f3a --pipe
//!
//! # Verbose logging (stderr)
//! RUST_LOG=debug bridge-worker 41234
//! ```
//!
//! # Exit Codes
//!
//! - `0`: the host quit, closed the stream, or the worker was interrupted
//! - `1`: anything else; `name: message` and the cause chain go to stderr

mod verifier;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use bridge_core::{
    create_transport, Bridge, BridgeConfig, BridgeError, BridgeOutcome, TransportConfig,
    TransportError,
};

use verifier::LocalVerifier;

/// Bridge Worker - serves depot verification requests for a host process
#[derive(Parser, Debug)]
#[command(name = "bridge-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipe name with --pipe, otherwise the host's TCP port
    id: String,

    /// Connect over a named-pipe pair instead of TCP
    #[arg(long)]
    pipe: bool,

    /// Directory holding pipe sockets (Unix)
    #[arg(long, value_name = "DIR")]
    pipe_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr; stdout is left to the host.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("bridge_worker={level},bridge_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn transport_config(args: &Args) -> Result<TransportConfig> {
    let mut config = TransportConfig::for_peer(&args.id, args.pipe)
        .context("Invalid connection id")?
        .with_env_overrides();
    if let Some(dir) = &args.pipe_dir {
        config = config.with_pipe_dir(dir);
    }
    Ok(config)
}

/// Connect and serve until the connection ends
async fn run(args: Args) -> Result<BridgeOutcome> {
    let transport = create_transport(&transport_config(&args)?);
    info!(transport = %transport.describe(), "Connecting to host");

    let stream = transport
        .open()
        .await
        .with_context(|| format!("Failed to connect over {}", transport.describe()))?;
    info!("Connected");

    let handle = Bridge::builder(BridgeConfig::from_env())
        .verifier(Arc::new(LocalVerifier))
        .start(stream);

    let shutdown = handle.shutdown_trigger();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            shutdown.trigger();
        }
    });

    Ok(handle.wait().await?)
}

/// `name: message` followed by the cause chain, one per line
fn exit_report(err: &anyhow::Error) -> String {
    let name = err
        .chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<BridgeError>() {
                Some(e.name())
            } else if cause.downcast_ref::<TransportError>().is_some() {
                Some("TransportError")
            } else {
                None
            }
        })
        .unwrap_or("Error");

    let mut report = format!("{name}: {err}");
    for cause in err.chain().skip(1) {
        let _ = write!(report, "\n  caused by: {cause}");
    }
    report
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "Bridge worker starting");

    match run(args).await {
        Ok(outcome) => {
            info!(?outcome, "Bridge worker finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Bridge worker failed");
            eprintln!("{}", exit_report(&e));
            ExitCode::FAILURE
        }
    }
}
