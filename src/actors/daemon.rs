//! DaemonActor - the single owner of the status store
//!
//! Connection tasks hand complete messages to the actor and wait for the
//! reply. The actor also drives housekeeping from a one-second ticker, so
//! every mutation of the store happens on this one task.
//!
//! Checkpoints are rendered on the actor and written from a blocking task.
//! A checkpoint that cannot be written is fatal.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use super::messages::{DaemonCommand, DaemonStats};
use crate::channels::ChannelSet;
use crate::daemon::{CheckpointJob, Daemon};
use crate::protocol::Reply;

/// Housekeeping granularity
const TICK: Duration = Duration::from_secs(1);

/// Queued commands before connection tasks wait for the actor
const COMMAND_BUFFER: usize = 256;

fn now() -> i64 {
    Utc::now().timestamp()
}

async fn write_checkpoint(job: CheckpointJob) -> Result<()> {
    tokio::task::spawn_blocking(move || job.write())
        .await
        .context("checkpoint writer task failed")?
}

/// Write a periodic checkpoint in the background, exiting if it fails
fn spawn_checkpoint(job: CheckpointJob) {
    tokio::spawn(async move {
        if let Err(e) = write_checkpoint(job).await {
            error!("checkpoint failed, giving up: {e:#}");
            std::process::exit(1);
        }
    });
}

pub struct DaemonActor {
    daemon: Daemon,
    command_rx: mpsc::Receiver<DaemonCommand>,
}

impl DaemonActor {
    pub fn new(daemon: Daemon, command_rx: mpsc::Receiver<DaemonCommand>) -> Self {
        Self { daemon, command_rx }
    }

    fn stats(&self) -> DaemonStats {
        DaemonStats {
            hosts: self.daemon.store.host_count(),
            records: self.daemon.store.hosts().map(|host| host.records.len()).sum(),
            messages: self.daemon.stats.total(),
            bogus: self.daemon.stats.bogus(),
            scheduled: self.daemon.scheduler.len(),
            channels: self.daemon.channels.stats(),
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting daemon actor");

        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(job) = self.daemon.tick(now()).await {
                        spawn_checkpoint(job);
                    }
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };
                    match cmd {
                        DaemonCommand::Message { text, peer, origin, respond_to } => {
                            let reply = self.daemon.dispatch(&text, peer, &origin, now()).await;
                            let _ = respond_to.send(reply);
                        }

                        DaemonCommand::Checkpoint { respond_to } => {
                            let result = match self.daemon.checkpoint_job(now()) {
                                Some(job) => write_checkpoint(job).await,
                                None => Err(anyhow!("no checkpoint file configured")),
                            };
                            let _ = respond_to.send(result);
                        }

                        DaemonCommand::Reload => {
                            debug!("received Reload command");
                            self.daemon.reload().await;
                        }

                        DaemonCommand::RotateLogs => {
                            self.daemon.rotate_logs().await;
                        }

                        DaemonCommand::Timeout => {
                            self.daemon.stats.count_bogus();
                        }

                        DaemonCommand::Stats { respond_to } => {
                            let _ = respond_to.send(self.stats());
                        }

                        DaemonCommand::Shutdown { respond_to } => {
                            let result = match self.daemon.shutdown(now()).await {
                                Some(job) => write_checkpoint(job).await,
                                None => Ok(()),
                            };
                            let _ = respond_to.send(result);
                            break;
                        }
                    }
                }
            }
        }

        info!("daemon actor stopped");
    }
}

/// Handle for talking to the DaemonActor
///
/// Cheap to clone; every connection task gets its own copy.
#[derive(Clone)]
pub struct DaemonHandle {
    sender: mpsc::Sender<DaemonCommand>,
    channels: ChannelSet,
}

impl DaemonHandle {
    /// Move the daemon onto its own task and return a handle to it
    pub fn spawn(daemon: Daemon) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let channels = daemon.channels.clone();

        tokio::spawn(DaemonActor::new(daemon, cmd_rx).run());

        Self {
            sender: cmd_tx,
            channels,
        }
    }

    /// Dispatch one message received from the network
    pub async fn submit(&self, text: String, peer: IpAddr) -> Result<Reply> {
        self.submit_from_origin(text, peer, String::new()).await
    }

    /// Dispatch one message that arrived through a named relay
    pub async fn submit_from_origin(&self, text: String, peer: IpAddr, origin: String) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DaemonCommand::Message {
                text,
                peer,
                origin,
                respond_to: tx,
            })
            .await
            .context("failed to send Message command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn checkpoint_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DaemonCommand::Checkpoint { respond_to: tx })
            .await
            .context("failed to send Checkpoint command")?;

        rx.await.context("failed to receive response")?
    }

    pub async fn reload(&self) -> Result<()> {
        self.sender
            .send(DaemonCommand::Reload)
            .await
            .context("failed to send Reload command")
    }

    pub async fn rotate_logs(&self) -> Result<()> {
        self.sender
            .send(DaemonCommand::RotateLogs)
            .await
            .context("failed to send RotateLogs command")
    }

    pub async fn report_timeout(&self) -> Result<()> {
        self.sender
            .send(DaemonCommand::Timeout)
            .await
            .context("failed to send Timeout command")
    }

    pub async fn stats(&self) -> Result<DaemonStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DaemonCommand::Stats { respond_to: tx })
            .await
            .context("failed to send Stats command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop the daemon, writing the final checkpoint
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DaemonCommand::Shutdown { respond_to: tx })
            .await
            .context("failed to send Shutdown command")?;

        rx.await.context("failed to receive response")?
    }

    /// The daemon's broadcast channels, for attaching workers
    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }
}
