use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hobbitd::{
    actors::daemon::DaemonHandle,
    config::{Config, read_config_file},
    daemon::Daemon,
    registry::StaticRegistry,
    server::Server,
    util::get_listen_override,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Hobbit status collection daemon")]
struct Args {
    /// Config file
    #[arg(short, long)]
    file: String,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Where periodic checkpoints are written
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,

    /// Checkpoint to restore at startup
    #[arg(long)]
    restart: Option<PathBuf>,

    /// Never turn stale statuses purple
    #[arg(long)]
    no_purple: bool,

    /// Log everything
    #[arg(long)]
    debug: bool,
}

fn init(debug: bool) {
    dotenv::dotenv().ok();

    let level = if debug {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let filter = filter::Targets::new().with_targets(vec![("hobbitd", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = read_config_file(&args.file)
        .with_context(|| format!("failed to load config file {}", args.file))?;

    if let Some(listen) = get_listen_override() {
        config.listen = listen;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(path) = &args.checkpoint_file {
        config.checkpoint_file = Some(path.clone());
    }
    if let Some(path) = &args.restart {
        config.restart_file = Some(path.clone());
    }
    if args.no_purple {
        config.purple_checks = false;
    }
    Ok(config)
}

/// SIGHUP reloads and rotates logs, SIGUSR1 writes a checkpoint
async fn handle_signals(handle: DaemonHandle, checkpoints: bool) -> anyhow::Result<()> {
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let mut usr1 =
        signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;

    loop {
        tokio::select! {
            Some(()) = hangup.recv() => {
                info!("SIGHUP received, reloading");
                handle.reload().await?;
                handle.rotate_logs().await?;
            }

            Some(()) = usr1.recv() => {
                if !checkpoints {
                    warn!("SIGUSR1 received but no checkpoint file is configured");
                    continue;
                }
                if let Err(e) = handle.checkpoint_now().await {
                    error!("checkpoint failed, giving up: {e:#}");
                    std::process::exit(1);
                }
            }

            else => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.debug);
    trace!("started with args: {args:?}");

    let config = load_config(&args)?;
    let registry = StaticRegistry::new(config.hosts.clone(), config.hosts_file.clone())?;

    let listen = config.listen;
    let timeout = config.connection_timeout();
    let checkpoints = config.checkpoint_file.is_some();
    let restart = config.restart_path().cloned();

    let now = chrono::Utc::now().timestamp();
    let mut daemon = Daemon::new(config, Arc::new(registry), now);
    if let Some(path) = restart {
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                daemon.restore(&text, now);
            }
            Err(e) => warn!("no checkpoint restored from {}: {e}", path.display()),
        }
    }

    let handle = DaemonHandle::spawn(daemon);
    let server = Server::bind(listen, handle.clone(), timeout).await?;

    let signals = tokio::spawn(handle_signals(handle.clone(), checkpoints));

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
    };

    server.run(shutdown).await?;
    signals.abort();

    handle.shutdown().await?;
    info!("hobbitd stopped");
    Ok(())
}
