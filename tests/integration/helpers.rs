//! Helper functions for integration tests

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use hobbitd::channels::{ChannelKind, ChannelSet};
use hobbitd::config::{Config, HostEntry};
use hobbitd::daemon::Daemon;
use hobbitd::registry::StaticRegistry;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Start time of every test daemon
pub const NOW: i64 = 1_700_000_000;

pub fn peer() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

pub fn host_entry(name: &str, ip: &str) -> HostEntry {
    HostEntry {
        name: name.to_string(),
        ip: ip.to_string(),
        ..Default::default()
    }
}

/// Two registered hosts; the daemon's own machine is not one of them
pub fn test_config() -> Config {
    Config {
        hosts: vec![host_entry("host1", "127.0.0.1"), host_entry("host2", "10.0.0.2")],
        machine: "hobbit-server".to_string(),
        ..Config::default()
    }
}

pub fn daemon_with(config: Config) -> Daemon {
    let registry = StaticRegistry::from_entries(config.hosts.clone());
    Daemon::new(config, Arc::new(registry), NOW)
}

pub fn daemon() -> Daemon {
    daemon_with(test_config())
}

/// Give recorder tasks time to drain what was posted
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Attached workers that keep every message they receive
pub struct Recorder {
    messages: Arc<Mutex<Vec<String>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Recorder {
    pub fn attach(channels: &ChannelSet, kinds: &[ChannelKind]) -> Self {
        let messages = Arc::new(Mutex::new(vec![]));
        let tasks = kinds
            .iter()
            .map(|kind| {
                let mut subscriber = channels.subscribe(*kind);
                let messages = messages.clone();
                tokio::spawn(async move {
                    while let Some(message) = subscriber.recv().await {
                        messages.lock().push(message.to_string());
                    }
                })
            })
            .collect();
        Self { messages, tasks }
    }

    pub fn all(channels: &ChannelSet) -> Self {
        Self::attach(channels, &ChannelKind::ALL)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Marker of every received message, in arrival order
    pub fn markers(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|message| {
                let rest = message.strip_prefix("@@")?;
                rest.split_once('#').map(|(marker, _)| marker.to_string())
            })
            .collect()
    }

    pub fn count(&self, marker: &str) -> usize {
        self.markers().iter().filter(|m| *m == marker).count()
    }

    /// Messages carrying the given marker
    pub fn with_marker(&self, marker: &str) -> Vec<String> {
        let prefix = format!("@@{marker}#");
        self.messages()
            .into_iter()
            .filter(|message| message.starts_with(&prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
