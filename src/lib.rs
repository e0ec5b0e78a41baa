//! Central status daemon
//!
//! Receives status reports over TCP, keeps the live state of every host and
//! test in memory, and fans state changes out to worker processes over
//! per-category broadcast channels.

pub mod actors;
pub mod board;
pub mod channels;
pub mod checkpoint;
pub mod clientcfg;
pub mod color;
pub mod config;
pub mod daemon;
pub mod downtime;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod state_machine;
pub mod stats;
pub mod store;
pub mod util;

/// Reported by `ping`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
