//! The daemon aggregate and its request dispatcher
//!
//! [`Daemon`] owns the status store, the scheduler, the broadcast channels
//! and the statistics. It is driven by exactly one task (see
//! [`crate::actors::daemon`]), so nothing inside needs locking. Every inbound
//! request goes through [`Daemon::dispatch`]; scheduled tasks and the
//! housekeeping sweeps use the same handlers.

mod housekeeping;
mod maint;
mod query;
mod status;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::channels::{ChannelKind, ChannelSet, Envelope, format};
use crate::checkpoint::{self, LoadContext, LoadReport};
use crate::clientcfg::ClientConfig;
use crate::color::{Color, ColorPolicy};
use crate::config::{Config, GhostHandling};
use crate::protocol::{ProtocolError, ProtocolResult, Reply, Verb, parse_status_header};
use crate::registry::{HostInfo, HostRegistry, SUMMARY_HOST, SenderAcl, SenderPolicy};
use crate::scheduler::Scheduler;
use crate::state_machine::{DEFAULT_VALIDITY, Report, StatusEvent};
use crate::stats::Statistics;
use crate::store::{HostKind, RecordKey, StatusStore, TestId};

pub use housekeeping::CheckpointJob;

/// Delay before the first stale sweep
const FIRST_STALE_SWEEP: i64 = 600;

const STALE_SWEEP_INTERVAL: i64 = 60;

const STATS_INTERVAL: i64 = 300;

/// Sender recorded for reports the daemon generates itself
pub const SELF_SENDER: &str = "hobbitd";

#[derive(Debug, Clone, Copy)]
struct Timers {
    next_stale_sweep: i64,
    next_stats: i64,
    next_checkpoint: i64,
}

/// A host name after registry resolution
#[derive(Debug, Clone)]
pub(crate) struct ResolvedHost {
    pub name: String,
    pub ip: String,
    pub kind: HostKind,
    pub info: Option<HostInfo>,
}

pub struct Daemon {
    config: Config,
    registry: Arc<dyn HostRegistry>,
    senders: SenderPolicy,
    policy: ColorPolicy,
    pub store: StatusStore,
    pub scheduler: Scheduler,
    pub channels: ChannelSet,
    pub stats: Statistics,
    client_config: ClientConfig,
    info_test: TestId,
    trends_test: TestId,
    timers: Timers,
}

impl Daemon {
    pub fn new(config: Config, registry: Arc<dyn HostRegistry>, now: i64) -> Self {
        let mut store = StatusStore::new(config.client_save);
        for test in &config.client_save_tests {
            let id = store.tests.intern(test);
            store.tests.set_client_save(id, true);
        }
        let info_test = store.tests.intern(&config.info_column);
        let trends_test = store.tests.intern(&config.trends_column);

        let channels = ChannelSet::new(
            config.channel_buffer_kb * 1024,
            Duration::from_secs(config.channel_watchdog_secs),
        );

        let timers = Timers {
            next_stale_sweep: now + FIRST_STALE_SWEEP,
            next_stats: now + STATS_INTERVAL,
            next_checkpoint: now + config.checkpoint_interval_secs as i64,
        };

        let mut daemon = Self {
            senders: SenderPolicy::from_config(&config.senders),
            policy: config.color_policy(),
            config,
            registry,
            store,
            scheduler: Scheduler::default(),
            channels,
            stats: Statistics::new(now),
            client_config: ClientConfig::default(),
            info_test,
            trends_test,
            timers,
        };
        daemon.load_client_config();
        daemon
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &dyn HostRegistry {
        self.registry.as_ref()
    }

    fn load_client_config(&mut self) {
        let Some(path) = &self.config.client_config_file else {
            return;
        };
        match ClientConfig::load(path) {
            Ok(config) => self.client_config = config,
            Err(e) => warn!("keeping previous client configuration: {e:#}"),
        }
    }

    /// Restore store and scheduler from checkpoint text
    pub fn restore(&mut self, text: &str, now: i64) -> LoadReport {
        let skip = [
            self.config.info_column.as_str(),
            self.config.trends_column.as_str(),
        ];
        let ctx = LoadContext {
            registry: self.registry.as_ref(),
            policy: self.policy,
            skip_tests: &skip,
            now,
        };
        checkpoint::load(text, &mut self.store, &mut self.scheduler, &ctx)
    }

    /// Handle one inbound request
    ///
    /// `peer` is the address the request came from; `origin` tags the
    /// reporting subsystem (empty for network input). Rejected requests are
    /// logged and counted and produce no reply.
    pub async fn dispatch(&mut self, msg: &str, peer: IpAddr, origin: &str, now: i64) -> Reply {
        let verb = match Verb::parse(msg) {
            Ok(verb) => verb,
            Err(e) => {
                debug!("request from {peer} rejected: {e}");
                self.stats.count_bogus();
                return Reply::None;
            }
        };
        self.stats.count(verb.name());
        trace!("{} request from {peer}", verb.name());

        match self.handle(verb, msg, peer, origin, now).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("{} from {peer} rejected: {e}", verb.name());
                self.stats.count_bogus();
                Reply::None
            }
        }
    }

    async fn handle(
        &mut self,
        verb: Verb,
        msg: &str,
        peer: IpAddr,
        origin: &str,
        now: i64,
    ) -> ProtocolResult<Reply> {
        match verb {
            Verb::Status => self.handle_status(msg, peer, origin, now).await,
            Verb::Combo => self.handle_combo(msg, peer, origin, now).await,
            Verb::Summary => self.handle_summary(msg, peer, now).await,
            Verb::Meta => self.handle_meta(msg, peer, origin),
            Verb::Data => self.handle_data(msg, peer, origin, now).await,
            Verb::Notes => self.handle_host_message(msg, peer, ChannelKind::Notes, now).await,
            Verb::UserMsg => self.handle_host_message(msg, peer, ChannelKind::User, now).await,
            Verb::Client => self.handle_client(msg, peer, now).await,
            Verb::Enable => self.handle_enable(msg, peer, now).await,
            Verb::Disable => self.handle_disable(msg, peer, now).await,
            Verb::Ack => self.handle_ack(msg, peer, now).await,
            Verb::AckInfo => self.handle_ackinfo(msg, peer, now),
            Verb::Drop => self.handle_drop(msg, peer).await,
            Verb::Rename => self.handle_rename(msg, peer).await,
            Verb::Notify => self.handle_notify(msg, peer, now).await,
            Verb::Schedule => self.handle_schedule(msg, peer),
            Verb::Query => self.handle_query(msg, peer),
            Verb::Log => self.handle_log(msg, peer, now),
            Verb::XLog => self.handle_xlog(msg, peer, now),
            Verb::Board => self.handle_board(msg, peer, now, false),
            Verb::XBoard => self.handle_board(msg, peer, now, true),
            Verb::HostInfo => self.handle_hostinfo(msg, peer),
            Verb::ClientLog => self.handle_clientlog(msg, peer),
            Verb::GhostList => self.handle_ghostlist(peer),
            Verb::Config => self.handle_file(msg, peer, false),
            Verb::Download => self.handle_file(msg, peer, true),
            Verb::Flush => self.handle_flush(msg),
            Verb::Ping => Ok(Reply::Text(format!("hobbitd {}\n", crate::VERSION))),
            Verb::Dummy => Ok(Reply::None),
            Verb::Channel => self.handle_channel(msg, peer),
        }
    }

    /// Resolve a reported host name, recording ghosts
    pub(crate) fn resolve_host(
        &mut self,
        name: &str,
        sender: &str,
        now: i64,
    ) -> ProtocolResult<ResolvedHost> {
        if name == SUMMARY_HOST {
            return Ok(ResolvedHost {
                name: SUMMARY_HOST.to_string(),
                ip: String::new(),
                kind: HostKind::Summary,
                info: None,
            });
        }
        if let Some(info) = self.registry.resolve(name) {
            return Ok(ResolvedHost {
                name: info.name.clone(),
                ip: info.ip.clone(),
                kind: HostKind::Normal,
                info: Some(info),
            });
        }

        self.store.ghosts.record(name, sender, now);
        match self.config.ghosts {
            GhostHandling::Allow => Ok(ResolvedHost {
                name: name.to_string(),
                ip: String::new(),
                kind: HostKind::Normal,
                info: None,
            }),
            GhostHandling::Drop => Err(ProtocolError::UnknownHost(name.to_string())),
            GhostHandling::Log => {
                info!("ghost report for {name} from {sender}");
                Err(ProtocolError::UnknownHost(name.to_string()))
            }
        }
    }

    /// Canonical name and address of a host without ghost bookkeeping
    fn known_host(&self, name: &str) -> Option<(String, String)> {
        if let Some(host) = self.store.host(name) {
            return Some((host.name.clone(), host.ip.clone()));
        }
        self.registry.resolve(name).map(|info| (info.name, info.ip))
    }

    fn authorize(
        acl: &SenderAcl,
        command: &'static str,
        peer: IpAddr,
        host_ip: Option<&str>,
    ) -> ProtocolResult<()> {
        if acl.allows(peer, host_ip) {
            Ok(())
        } else {
            Err(ProtocolError::Unauthorized {
                command,
                sender: peer.to_string(),
            })
        }
    }

    /// Run a report through the state machine and post the resulting events
    pub(crate) async fn apply_report(
        &mut self,
        key: &RecordKey,
        report: &Report<'_>,
        now: i64,
    ) -> ProtocolResult<()> {
        let events = self
            .store
            .apply_status(key, report, self.policy, now)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let envelopes = self.render_events(key, &events);
        for (kind, envelope) in envelopes {
            self.channels.post(kind, &envelope).await;
        }
        Ok(())
    }

    fn render_events(&self, key: &RecordKey, events: &[StatusEvent]) -> Vec<(ChannelKind, Envelope)> {
        let (Some(host), Some(record)) = (self.store.host(&key.host), self.store.record(key)) else {
            return vec![];
        };
        let info = self.registry.resolve(&key.host);
        let test = self.store.test_name(key.test);
        let view = format::RecordView {
            host,
            record,
            test,
            origin: self.store.origin_name(key.origin),
            info: info.as_ref(),
        };
        let envelope = |marker, payload| Envelope::new(marker, Some(&host.name), &record.sender, payload);

        events
            .iter()
            .map(|event| match event {
                StatusEvent::EnableDisable => (
                    ChannelKind::EnableDisable,
                    envelope("enadis", format::enable_disable(&host.name, test, record.enabled_at)),
                ),
                StatusEvent::StatusChange { previous_change } => (
                    ChannelKind::StatusChange,
                    envelope("stachg", format::status_change(&view, *previous_change)),
                ),
                StatusEvent::ClientChange => (
                    ChannelKind::ClientChange,
                    envelope("clichg", format::client_change(host)),
                ),
                StatusEvent::Page(reason) => {
                    trace!("paging {}.{test}: {reason:?}", host.name);
                    (ChannelKind::Page, envelope("page", format::page(&view)))
                }
                StatusEvent::Status => (ChannelKind::Status, envelope("status", format::status(&view))),
            })
            .collect()
    }

    /// Re-apply the stored message of a record with a new color
    pub(crate) async fn reapply(&mut self, key: &RecordKey, color: Color, sender: &str, now: i64) {
        let Some(record) = self.store.record(key) else {
            return;
        };
        let validity = parse_status_header(&record.message)
            .ok()
            .and_then(|header| header.validity)
            .unwrap_or(DEFAULT_VALIDITY);
        let groups = record.groups.clone();
        let report = Report {
            color,
            message: None,
            sender,
            groups: groups.as_deref(),
            downtime: None,
            validity_minutes: validity,
        };
        if let Err(e) = self.apply_report(key, &report, now).await {
            warn!("failed to update {}: {e}", key.host);
        }
    }

    /// Post a host-less marker to every control channel
    pub(crate) async fn post_marker(&self, marker: &'static str, sender: &str, payload: String) {
        let envelope = Envelope::new(marker, None, sender, payload);
        self.channels.post_control(&envelope).await;
    }
}
