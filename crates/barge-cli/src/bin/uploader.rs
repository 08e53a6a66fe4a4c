//! Uploader binary: offer one or more files to a receiver and serve
//! its chunk requests until every transfer is acknowledged.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::info;
use uuid::Uuid;

use barge_cli::identity;
use barge_cli::UploaderRole;
use barge_files::FileSource;
use barge_net::{Broker, Connection, PollGroup, SignalWatch, DEFAULT_PORT};

/// Upload files to a barge receiver.
#[derive(Parser)]
#[command(name = "uploader", version, about)]
struct Cli {
    /// Destination host
    #[arg(short = 'd', long = "dest", default_value = "localhost")]
    host: String,

    /// Destination port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Peer id to present (defaults to the persisted identity)
    #[arg(short = 'u', long = "peer-id")]
    peer_id: Option<Uuid>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
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
    let peer = match cli.peer_id {
        Some(id) => id,
        None => identity::load_or_create()?,
    };

    info!("uploader starting");
    info!("  peer id:  {peer}");
    info!("  receiver: {}:{}", cli.host, cli.port);

    // Hashing happens here, once per file, before anything touches the
    // network; a bad path must fail the run, not a worker.
    let mut sources = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let source = FileSource::open(path)
            .with_context(|| format!("cannot offer {}", path.display()))?;
        sources.push(Arc::new(source));
    }

    let role = Arc::new(UploaderRole::new(peer));
    let broker = Arc::new(Broker::new(role.clone(), 1));
    let group = PollGroup::new(2);
    let signals = SignalWatch::new()?;
    let conn = Connection::connect(&cli.host, cli.port, broker.clone())
        .with_context(|| format!("cannot reach {}:{}", cli.host, cli.port))?;

    group.add(signals.clone())?;
    group.add(conn.clone())?;

    for source in sources {
        role.offer(&conn, source)?;
    }

    while !role.uploads_completed() && group.poll_once()? && !signals.terminated() {}

    broker.shutdown();
    info!("uploader terminating");
    Ok(())
}
