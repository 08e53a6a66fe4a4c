//! Receiver binary: accept uploader connections and reassemble their
//! files under the receive root until told to shut down.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;

use barge_cli::ReceiverRole;
use barge_net::{Broker, Listener, PollGroup, SignalWatch, DEFAULT_PORT};

/// Most simultaneous uploader connections the loop will carry.
const MAX_CONNECTIONS: usize = 1024;

/// Worker threads handling requests; chunk writes and digest passes
/// all happen here.
const WORKER_THREADS: usize = 16;

/// Receive files from barge uploaders.
#[derive(Parser)]
#[command(name = "receiver", version, about)]
struct Cli {
    /// Listening port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory receiving uploaded files
    #[arg(short, long, default_value = "/in")]
    root: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    info!("receiver starting on port {}, root {}", cli.port, cli.root.display());

    let role = Arc::new(ReceiverRole::new(cli.root));
    let broker = Arc::new(Broker::new(role, WORKER_THREADS));
    let group = Arc::new(PollGroup::new(MAX_CONNECTIONS + 2));
    let signals = SignalWatch::new()?;
    let listener = Listener::bind(cli.port, MAX_CONNECTIONS, group.clone(), broker.clone())?;

    group.add(listener)?;
    group.add(signals.clone())?;
    info!("receiver ready");

    while group.poll_once()? && !signals.terminated() {}

    broker.shutdown();
    info!("receiver terminating");
    Ok(())
}
