//! Host registry and sender access lists
//!
//! The daemon never invents hosts: every hostname in a report is resolved
//! against a [`HostRegistry`] first. The registry hands back the canonical
//! name, the host IP and the routing attributes used on the page channel.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config::{HostEntry, read_hosts_file};

/// Name of the synthetic aggregate host
pub const SUMMARY_HOST: &str = "summary";

/// Registry attributes of one host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostInfo {
    pub name: String,
    pub ip: String,
    pub aliases: Vec<String>,
    pub page_paths: Vec<String>,
    pub class: Option<String>,
    pub os: Option<String>,
    pub net: Option<String>,
    pub dialup: bool,
    pub noinfo: bool,
    pub notrends: bool,
    pub downtime: Option<String>,
}

impl HostInfo {
    pub fn primary_page(&self) -> &str {
        self.page_paths.first().map(String::as_str).unwrap_or("")
    }

    pub fn all_pages(&self) -> String {
        self.page_paths.join(",")
    }

    /// Host attribute by its board field name (`BBH_*`)
    pub fn attribute(&self, field: &str) -> Option<String> {
        let value = match field {
            "BBH_HOSTNAME" => self.name.clone(),
            "BBH_IP" => self.ip.clone(),
            "BBH_CLASS" => self.class.clone().unwrap_or_default(),
            "BBH_OS" => self.os.clone().unwrap_or_default(),
            "BBH_NET" => self.net.clone().unwrap_or_default(),
            "BBH_PAGEPATH" => self.primary_page().to_string(),
            "BBH_ALLPAGEPATHS" => self.all_pages(),
            "BBH_RAW" => self.raw(),
            _ => return None,
        };
        Some(value)
    }

    /// The host rendered as a hosts-file line
    pub fn raw(&self) -> String {
        let mut tags = vec![];
        if self.dialup {
            tags.push(String::from("dialup"));
        }
        if self.noinfo {
            tags.push(String::from("noinfo"));
        }
        if self.notrends {
            tags.push(String::from("notrends"));
        }
        if let Some(net) = &self.net {
            tags.push(format!("NET:{net}"));
        }
        if let Some(class) = &self.class {
            tags.push(format!("CLASS:{class}"));
        }
        if let Some(os) = &self.os {
            tags.push(format!("OS:{os}"));
        }
        if let Some(downtime) = &self.downtime {
            tags.push(format!("DOWNTIME={downtime}"));
        }
        format!("{} {} # {}", self.ip, self.name, tags.join(" "))
    }
}

impl From<HostEntry> for HostInfo {
    fn from(entry: HostEntry) -> Self {
        Self {
            name: entry.name,
            ip: entry.ip,
            aliases: entry.aliases,
            page_paths: entry.page_paths,
            class: entry.class,
            os: entry.os,
            net: entry.net,
            dialup: entry.dialup,
            noinfo: entry.noinfo,
            notrends: entry.notrends,
            downtime: entry.downtime,
        }
    }
}

/// Source of truth for which hosts exist
pub trait HostRegistry: Send + Sync {
    /// Resolve a reported name to the registry entry
    fn resolve(&self, name: &str) -> Option<HostInfo>;

    /// All hosts in name order
    fn hosts(&self) -> Vec<HostInfo>;

    /// Re-read the backing configuration
    fn reload(&self) -> anyhow::Result<()>;

    /// Record the OS and class a client report announced
    fn set_client_info(&self, name: &str, os: &str, class: Option<&str>);
}

/// Registry built from inline config entries plus an optional hosts file
pub struct StaticRegistry {
    inline: Vec<HostEntry>,
    hosts_file: Option<PathBuf>,
    hosts: RwLock<BTreeMap<String, HostInfo>>,
}

impl StaticRegistry {
    pub fn new(inline: Vec<HostEntry>, hosts_file: Option<PathBuf>) -> anyhow::Result<Self> {
        let registry = Self {
            inline,
            hosts_file,
            hosts: RwLock::new(BTreeMap::new()),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn from_entries(entries: Vec<HostEntry>) -> Self {
        let hosts = entries
            .iter()
            .cloned()
            .map(|entry| (entry.name.clone(), HostInfo::from(entry)))
            .collect();
        Self {
            inline: entries,
            hosts_file: None,
            hosts: RwLock::new(hosts),
        }
    }

    fn load_entries(&self) -> anyhow::Result<Vec<HostEntry>> {
        let mut entries = self.inline.clone();
        if let Some(path) = &self.hosts_file {
            let from_file = read_hosts_file(path)
                .with_context(|| format!("failed to load hosts file {}", path.display()))?;
            entries.extend(from_file);
        }
        Ok(entries)
    }
}

impl HostRegistry for StaticRegistry {
    fn resolve(&self, name: &str) -> Option<HostInfo> {
        let hosts = self.hosts.read();
        if let Some(info) = hosts.get(name) {
            return Some(info.clone());
        }
        hosts
            .values()
            .find(|info| {
                info.name.eq_ignore_ascii_case(name)
                    || info.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
            })
            .cloned()
    }

    fn hosts(&self) -> Vec<HostInfo> {
        self.hosts.read().values().cloned().collect()
    }

    fn reload(&self) -> anyhow::Result<()> {
        let entries = self.load_entries()?;
        let mut fresh = BTreeMap::new();
        for entry in entries {
            if entry.name.is_empty() {
                warn!("ignoring host entry without a name");
                continue;
            }
            // runtime OS/class learned from client reports survive a reload
            let mut info = HostInfo::from(entry);
            if let Some(previous) = self.hosts.read().get(&info.name) {
                if info.os.is_none() {
                    info.os = previous.os.clone();
                }
                if info.class.is_none() {
                    info.class = previous.class.clone();
                }
            }
            fresh.insert(info.name.clone(), info);
        }
        debug!("host registry loaded with {} hosts", fresh.len());
        *self.hosts.write() = fresh;
        Ok(())
    }

    fn set_client_info(&self, name: &str, os: &str, class: Option<&str>) {
        let mut hosts = self.hosts.write();
        let Some(info) = hosts.get_mut(name) else {
            return;
        };
        info.os = Some(os.to_string());
        if info.class.is_none() {
            info.class = class.map(str::to_string);
        }
    }
}

/// One entry of a sender access list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(text: &str) -> Option<Self> {
        let (addr, prefix) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (text, None),
        };
        let addr: IpAddr = addr.trim().parse().ok()?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().ok().filter(|p| *p <= max)?,
            None => max,
        };
        Some(Self { addr, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

/// Access list for one command category
#[derive(Debug, Clone, Default)]
pub struct SenderAcl {
    networks: Option<Vec<Network>>,
}

impl SenderAcl {
    pub fn new(entries: Option<&[String]>) -> Self {
        let networks = entries.map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let network = Network::parse(entry);
                    if network.is_none() {
                        warn!("ignoring invalid sender entry '{entry}'");
                    }
                    network
                })
                .collect()
        });
        Self { networks }
    }

    /// Whether `peer` may act on a host whose registry IP is `host_ip`
    ///
    /// With no list everyone is allowed. A host may always report on itself.
    pub fn allows(&self, peer: IpAddr, host_ip: Option<&str>) -> bool {
        let Some(networks) = &self.networks else {
            return true;
        };
        if host_ip.and_then(|ip| ip.parse::<IpAddr>().ok()) == Some(peer) {
            return true;
        }
        networks.iter().any(|network| network.contains(peer))
    }
}

/// The four access lists the dispatcher consults
#[derive(Debug, Clone, Default)]
pub struct SenderPolicy {
    pub maint: SenderAcl,
    pub status: SenderAcl,
    pub admin: SenderAcl,
    pub www: SenderAcl,
}

impl SenderPolicy {
    pub fn from_config(lists: &crate::config::SenderLists) -> Self {
        Self {
            maint: SenderAcl::new(lists.maint.as_deref()),
            status: SenderAcl::new(lists.status.as_deref()),
            admin: SenderAcl::new(lists.admin.as_deref()),
            www: SenderAcl::new(lists.www.as_deref()),
        }
    }
}
