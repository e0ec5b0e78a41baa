use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::trace;

use crate::color::{ColorPolicy, ColorSet};

/// What to do with reports for hosts the registry does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GhostHandling {
    /// Accept the report as if the host was known
    Allow,
    /// Reject silently
    Drop,
    /// Reject and log
    #[default]
    Log,
}

/// Per-category sender access lists
///
/// An absent list lets everybody through. Entries are IP addresses or CIDR
/// networks such as `10.0.0.0/8`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SenderLists {
    pub maint: Option<Vec<String>>,
    pub status: Option<Vec<String>>,
    pub admin: Option<Vec<String>>,
    pub www: Option<Vec<String>>,
}

/// A host known to the daemon
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct HostEntry {
    pub name: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub page_paths: Vec<String>,
    pub class: Option<String>,
    pub os: Option<String>,
    pub net: Option<String>,
    #[serde(default)]
    pub dialup: bool,
    #[serde(default)]
    pub noinfo: bool,
    #[serde(default)]
    pub notrends: bool,
    pub downtime: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "crate::util::get_default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    pub checkpoint_file: Option<PathBuf>,

    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    /// Checkpoint to restore at startup; defaults to `checkpoint_file`
    pub restart_file: Option<PathBuf>,

    pub hosts_file: Option<PathBuf>,

    #[serde(default)]
    pub hosts: Vec<HostEntry>,

    #[serde(default)]
    pub ghosts: GhostHandling,

    #[serde(default = "default_true")]
    pub purple_checks: bool,

    #[serde(default = "default_alert_colors")]
    pub alert_colors: ColorSet,

    #[serde(default = "default_ok_colors")]
    pub ok_colors: ColorSet,

    #[serde(default)]
    pub senders: SenderLists,

    #[serde(default = "default_channel_buffer_kb")]
    pub channel_buffer_kb: usize,

    #[serde(default = "default_channel_watchdog")]
    pub channel_watchdog_secs: u64,

    #[serde(default = "crate::util::get_machine_name")]
    pub machine: String,

    #[serde(default = "default_ping_column")]
    pub ping_column: String,

    #[serde(default = "default_info_column")]
    pub info_column: String,

    #[serde(default = "default_trends_column")]
    pub trends_column: String,

    #[serde(default)]
    pub client_save: bool,

    #[serde(default)]
    pub client_save_tests: Vec<String>,

    pub client_config_file: Option<PathBuf>,

    pub config_dir: Option<PathBuf>,

    pub download_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub allow_downloads: bool,

    pub ack_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: crate::util::get_default_listen(),
            connection_timeout_secs: default_connection_timeout(),
            checkpoint_file: None,
            checkpoint_interval_secs: default_checkpoint_interval(),
            restart_file: None,
            hosts_file: None,
            hosts: vec![],
            ghosts: GhostHandling::default(),
            purple_checks: true,
            alert_colors: default_alert_colors(),
            ok_colors: default_ok_colors(),
            senders: SenderLists::default(),
            channel_buffer_kb: default_channel_buffer_kb(),
            channel_watchdog_secs: default_channel_watchdog(),
            machine: crate::util::get_machine_name(),
            ping_column: default_ping_column(),
            info_column: default_info_column(),
            trends_column: default_trends_column(),
            client_save: false,
            client_save_tests: vec![],
            client_config_file: None,
            config_dir: None,
            download_dir: None,
            allow_downloads: true,
            ack_log: None,
        }
    }
}

impl Config {
    pub fn color_policy(&self) -> ColorPolicy {
        ColorPolicy {
            ok: self.ok_colors,
            alert: self.alert_colors,
        }
    }

    /// Connection timeout clamped to 5..=60 seconds
    pub fn connection_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connection_timeout_secs.clamp(5, 60))
    }

    pub fn restart_path(&self) -> Option<&PathBuf> {
        self.restart_file.as_ref().or(self.checkpoint_file.as_ref())
    }
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_checkpoint_interval() -> u64 {
    900
}

fn default_true() -> bool {
    true
}

fn default_alert_colors() -> ColorSet {
    ColorPolicy::default().alert
}

fn default_ok_colors() -> ColorSet {
    ColorPolicy::default().ok
}

fn default_channel_buffer_kb() -> usize {
    512
}

fn default_channel_watchdog() -> u64 {
    5
}

fn default_ping_column() -> String {
    String::from("conn")
}

fn default_info_column() -> String {
    String::from("info")
}

fn default_trends_column() -> String {
    String::from("trends")
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Read a JSON array of host entries
pub fn read_hosts_file(path: &std::path::Path) -> anyhow::Result<Vec<HostEntry>> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid hosts file {}: {e}", path.display()))
}
