//! Actor that owns the daemon state
//!
//! ## Architecture Overview
//!
//! ```text
//!   connection tasks (one per socket)
//!        │  DaemonCommand::Message + oneshot reply
//!        ▼
//!   ┌──────────────┐   1s tick: scheduler, stale sweep,
//!   │ DaemonActor  │   self-status, checkpoint + reload
//!   │  (Daemon)    │
//!   └──────┬───────┘
//!          │ post (barrier)
//!          ▼
//!   broadcast channels ──► attached workers
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: connection tasks and signal handlers talk to the actor over one mpsc channel
//! 2. **Request/Response**: replies travel back on oneshot channels
//! 3. **Events**: status events leave through the broadcast channels, which workers attach to directly

pub mod daemon;
pub mod messages;
