//! Broadcast channels to worker processes
//!
//! Each event category has one [`BroadcastChannel`]. A channel holds at most
//! one message in flight: every attached [`Subscriber`] must receive it before
//! the next post is written. A worker that stops reading therefore stalls its
//! channel; the poster gives up after the watchdog timeout and drops the post.
//!
//! ```text
//!  post(msg) ─► readers == 0 ? ──yes──► dropped (NoReaders)
//!                   │ no
//!                   ▼
//!          wait until pending == 0 ──timeout──► dropped (Stalled)
//!                   │
//!                   ▼
//!   current = msg, pending = readers, generation += 1
//!                   │
//!        ┌──────────┼──────────┐
//!        ▼          ▼          ▼
//!   Subscriber  Subscriber  Subscriber   each recv() decrements pending
//! ```

pub mod format;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tracing::{error, trace, warn};

pub use format::Envelope;

/// Highest sequence number before wrapping back to 1
pub const MAX_SEQUENCE: u32 = 999_999;

/// Event categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Status,
    StatusChange,
    Page,
    Data,
    Notes,
    EnableDisable,
    Client,
    ClientChange,
    User,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 9] = [
        ChannelKind::Status,
        ChannelKind::StatusChange,
        ChannelKind::Page,
        ChannelKind::Data,
        ChannelKind::Notes,
        ChannelKind::EnableDisable,
        ChannelKind::Client,
        ChannelKind::ClientChange,
        ChannelKind::User,
    ];

    /// Channels that receive drop, rename, logrotate and shutdown markers
    pub const CONTROL: [ChannelKind; 7] = [
        ChannelKind::Status,
        ChannelKind::StatusChange,
        ChannelKind::Page,
        ChannelKind::Data,
        ChannelKind::Notes,
        ChannelKind::EnableDisable,
        ChannelKind::Client,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Status => "status",
            ChannelKind::StatusChange => "stachg",
            ChannelKind::Page => "page",
            ChannelKind::Data => "data",
            ChannelKind::Notes => "notes",
            ChannelKind::EnableDisable => "enadis",
            ChannelKind::Client => "client",
            ChannelKind::ClientChange => "clichg",
            ChannelKind::User => "user",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ChannelKind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// What happened to a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Delivered { seq: u32, readers: usize },
    NoReaders,
    /// The previous message was not drained within the watchdog timeout
    Stalled,
    Closed,
}

#[derive(Debug, Default)]
struct State {
    seq: u32,
    message_count: u64,
    generation: u64,
    pending: usize,
    readers: usize,
    current: Option<Arc<str>>,
    closed: bool,
}

/// One category's broadcast-with-barrier
#[derive(Debug)]
pub struct BroadcastChannel {
    kind: ChannelKind,
    capacity: usize,
    watchdog: Duration,
    state: Mutex<State>,
    drained: Notify,
    published: watch::Sender<u64>,
}

impl BroadcastChannel {
    pub fn new(kind: ChannelKind, capacity: usize, watchdog: Duration) -> Self {
        let (published, _) = watch::channel(0);
        Self {
            kind,
            capacity,
            watchdog,
            state: Mutex::new(State::default()),
            drained: Notify::new(),
            published,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    pub fn message_count(&self) -> u64 {
        self.state.lock().message_count
    }

    /// Attach a new worker; it sees messages posted from now on
    pub fn subscribe(self: &Arc<Self>) -> Subscriber {
        let mut state = self.state.lock();
        state.readers += 1;
        Subscriber {
            channel: Arc::clone(self),
            published: self.published.subscribe(),
            last_seen: state.generation,
        }
    }

    /// Broadcast one event to every attached worker
    pub async fn post(&self, envelope: &Envelope) -> PostOutcome {
        let deadline = tokio::time::Instant::now() + self.watchdog;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return PostOutcome::Closed;
                }
                if state.readers == 0 {
                    trace!("no readers on {} channel, dropping {}", self.kind.name(), envelope.marker);
                    return PostOutcome::NoReaders;
                }
                if state.pending == 0 {
                    return self.publish(&mut state, envelope);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                error!(
                    "watchdog expired on {} channel, dropping {} message",
                    self.kind.name(),
                    envelope.marker
                );
                return PostOutcome::Stalled;
            }
        }
    }

    fn publish(&self, state: &mut State, envelope: &Envelope) -> PostOutcome {
        if state.seq >= MAX_SEQUENCE {
            state.seq = 0;
        }
        state.seq += 1;
        state.message_count += 1;

        let now = Utc::now();
        let (text, truncated) = envelope.render(
            state.seq,
            now.timestamp(),
            now.timestamp_subsec_micros(),
            self.capacity,
        );
        if truncated {
            warn!(
                "{} message for {} truncated to {} bytes",
                self.kind.name(),
                envelope.host.as_deref().unwrap_or("*"),
                self.capacity
            );
        }

        state.current = Some(Arc::from(text));
        state.pending = state.readers;
        state.generation += 1;
        self.published.send_replace(state.generation);

        PostOutcome::Delivered {
            seq: state.seq,
            readers: state.readers,
        }
    }

    /// Wake all subscribers and make further posts fail
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.published.send_modify(|_| {});
        self.drained.notify_waiters();
    }
}

/// An attached worker
#[derive(Debug)]
pub struct Subscriber {
    channel: Arc<BroadcastChannel>,
    published: watch::Receiver<u64>,
    last_seen: u64,
}

impl Subscriber {
    pub fn kind(&self) -> ChannelKind {
        self.channel.kind
    }

    /// Next message; receiving it is the drain acknowledgement
    ///
    /// Returns `None` once the channel is closed and nothing is left.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        loop {
            self.published.borrow_and_update();
            {
                let mut state = self.channel.state.lock();
                if state.generation > self.last_seen {
                    self.last_seen = state.generation;
                    state.pending = state.pending.saturating_sub(1);
                    if state.pending == 0 {
                        self.channel.drained.notify_waiters();
                    }
                    return state.current.clone();
                }
                if state.closed {
                    return None;
                }
            }
            if self.published.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let mut state = self.channel.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.generation > self.last_seen && state.pending > 0 {
            state.pending -= 1;
            if state.pending == 0 {
                self.channel.drained.notify_waiters();
            }
        }
    }
}

/// Per-channel numbers for the self-status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub kind: ChannelKind,
    pub messages: u64,
    pub readers: usize,
}

/// All nine channels
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: Vec<Arc<BroadcastChannel>>,
}

impl ChannelSet {
    pub fn new(capacity: usize, watchdog: Duration) -> Self {
        Self {
            channels: ChannelKind::ALL
                .into_iter()
                .map(|kind| Arc::new(BroadcastChannel::new(kind, capacity, watchdog)))
                .collect(),
        }
    }

    pub fn get(&self, kind: ChannelKind) -> &Arc<BroadcastChannel> {
        &self.channels[kind.index()]
    }

    pub fn subscribe(&self, kind: ChannelKind) -> Subscriber {
        self.get(kind).subscribe()
    }

    pub async fn post(&self, kind: ChannelKind, envelope: &Envelope) -> PostOutcome {
        self.get(kind).post(envelope).await
    }

    /// Post the same marker to every control channel
    pub async fn post_control(&self, envelope: &Envelope) {
        for kind in ChannelKind::CONTROL {
            self.post(kind, envelope).await;
        }
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels
            .iter()
            .map(|channel| ChannelStats {
                kind: channel.kind,
                messages: channel.message_count(),
                readers: channel.readers(),
            })
            .collect()
    }

    pub fn close(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }
}
