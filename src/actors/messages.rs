//! Message types for talking to the daemon actor
//!
//! Every mutation of the status store goes through a [`DaemonCommand`];
//! replies come back over `oneshot` channels.

use std::net::IpAddr;

use tokio::sync::oneshot;

use crate::channels::ChannelStats;
use crate::protocol::Reply;

/// Commands that can be sent to the DaemonActor
#[derive(Debug)]
pub enum DaemonCommand {
    /// A complete inbound message read from a connection
    Message {
        text: String,
        peer: IpAddr,

        /// Name of the relay the message arrived through; empty for the network
        origin: String,

        respond_to: oneshot::Sender<Reply>,
    },

    /// Write a checkpoint now and report how it went
    Checkpoint {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Re-read the host registry and client configuration
    Reload,

    /// Tell workers to reopen their log files
    RotateLogs,

    /// A connection hit its timeout before finishing
    Timeout,

    /// Snapshot of the daemon's counters
    Stats {
        respond_to: oneshot::Sender<DaemonStats>,
    },

    /// Post shutdown markers, write the final checkpoint and stop
    Shutdown {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
}

/// Counters exposed through [`DaemonCommand::Stats`]
#[derive(Debug, Clone, Default)]
pub struct DaemonStats {
    pub hosts: usize,
    pub records: usize,
    pub messages: u64,
    pub bogus: u64,
    pub scheduled: usize,
    pub channels: Vec<ChannelStats>,
}
