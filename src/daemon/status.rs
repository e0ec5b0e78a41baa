//! Status-bearing requests: status, combo, summary, meta, data, notes,
//! usermsg and client

use std::net::IpAddr;

use tracing::{debug, info};

use super::{Daemon, ResolvedHost, SELF_SENDER};
use crate::channels::{ChannelKind, Envelope, format};
use crate::color::Color;
use crate::downtime;
use crate::protocol::{
    ProtocolError, ProtocolResult, Reply, client_proxy_ip, parse_status_header, relayed_sender,
    split_blocks, split_host_test,
};
use crate::state_machine::{DEFAULT_VALIDITY, Report};
use crate::store::{ClientReport, RecordKey};
use crate::util::{first_line, msg_data, next_word};

/// One parsed status report ready to be stored
struct StatusUpdate<'a> {
    msg: &'a str,
    test: &'a str,
    groups: Option<&'a str>,
    validity: Option<i64>,
    color: Color,
    sender: &'a str,
    origin: &'a str,
}

impl Daemon {
    pub(super) async fn handle_status(
        &mut self,
        msg: &str,
        peer: IpAddr,
        origin: &str,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let (msg, relayed) = relayed_sender(msg);
        let sender = relayed.unwrap_or_else(|| peer.to_string());
        let header = parse_status_header(&msg)?;

        let host = self.resolve_host(&header.host, &sender, now)?;
        Self::authorize(&self.senders.status, "status", peer, Some(&host.ip))?;

        let color = header.color.ok_or_else(|| {
            ProtocolError::Malformed(format!("no color for {}.{}", header.host, header.test))
        })?;
        if color == Color::Purple {
            info!("ignored purple status for {}.{} from {sender}", host.name, header.test);
            return Ok(Reply::None);
        }

        let update = StatusUpdate {
            msg: &msg,
            test: header.test,
            groups: header.groups,
            validity: header.validity,
            color,
            sender: &sender,
            origin,
        };
        self.store_status(update, host, now).await?;
        Ok(Reply::None)
    }

    pub(super) async fn handle_combo(
        &mut self,
        msg: &str,
        peer: IpAddr,
        origin: &str,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let body = msg.strip_prefix("combo").unwrap_or(msg).trim_start();
        for block in split_blocks(body, "status") {
            if !block.starts_with("status") {
                debug!("skipping combo block without status keyword");
                continue;
            }
            self.stats.count_combo_part();
            if let Err(e) = self.handle_status(block, peer, origin, now).await {
                debug!("combo part from {peer} rejected: {e}");
                self.stats.count_bogus();
            }
        }
        Ok(Reply::None)
    }

    /// `summary summary.ROW.COLUMN COLOR URL`, accepted from anyone
    pub(super) async fn handle_summary(
        &mut self,
        msg: &str,
        peer: IpAddr,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(msg);
        let (target, rest) = next_word(rest);
        let test = target
            .strip_prefix("summary.")
            .filter(|test| !test.is_empty())
            .ok_or_else(|| ProtocolError::Malformed(format!("bad summary target '{target}'")))?;
        let (color_word, _) = next_word(rest);
        let color = Color::parse_prefix(color_word)
            .ok_or_else(|| ProtocolError::Malformed(format!("no color for summary {test}")))?;

        let sender = peer.to_string();
        let host = self.resolve_host(crate::registry::SUMMARY_HOST, &sender, now)?;
        let update = StatusUpdate {
            msg,
            test,
            groups: None,
            validity: None,
            color,
            sender: &sender,
            origin: "",
        };
        self.store_status(update, host, now).await?;
        Ok(Reply::None)
    }

    /// Apply the daemon's own status report
    pub(crate) async fn apply_own_status(&mut self, msg: &str, now: i64) -> ProtocolResult<()> {
        let header = parse_status_header(msg)?;
        let host = self.resolve_host(&header.host, SELF_SENDER, now)?;
        let color = header
            .color
            .ok_or_else(|| ProtocolError::Malformed(String::from("self-status without color")))?;
        let update = StatusUpdate {
            msg,
            test: header.test,
            groups: header.groups,
            validity: header.validity,
            color,
            sender: SELF_SENDER,
            origin: "",
        };
        self.store_status(update, host, now).await
    }

    async fn store_status(
        &mut self,
        update: StatusUpdate<'_>,
        host: ResolvedHost,
        now: i64,
    ) -> ProtocolResult<()> {
        let cause = match (&host.info, update.color) {
            (Some(info), Color::Red | Color::Yellow) => info
                .downtime
                .as_deref()
                .and_then(|spec| downtime::active_cause_at(spec, update.test, now)),
            _ => None,
        };
        let color = if cause.is_some() {
            debug!("{}.{} is in scheduled downtime", host.name, update.test);
            Color::DISABLED
        } else {
            update.color
        };

        self.store.find_or_create_host(&host.name, &host.ip, host.kind);
        let test = self.store.find_or_create_test(update.test);
        let origin = self.store.find_or_create_origin(update.origin);
        self.store
            .find_or_create_record(&host.name, test, origin)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let key = RecordKey {
            host: host.name,
            test,
            origin,
        };
        let report = Report {
            color,
            message: Some(update.msg),
            sender: update.sender,
            groups: update.groups,
            downtime: cause.as_deref(),
            validity_minutes: update.validity.unwrap_or(DEFAULT_VALIDITY),
        };
        self.apply_report(&key, &report, now).await
    }

    /// `meta HOST.TEST NAME\nVALUE`, possibly several blocks
    pub(super) fn handle_meta(&mut self, msg: &str, peer: IpAddr, origin: &str) -> ProtocolResult<Reply> {
        for block in split_blocks(msg, "meta") {
            let (header, value) = block.split_once('\n').unwrap_or((block, ""));
            let mut words = header.split_whitespace().skip(1);
            let (Some(target), Some(name)) = (words.next(), words.next()) else {
                debug!("meta block without target or name");
                continue;
            };
            let (hostname, test) = split_host_test(target)?;
            let Some((hostname, ip)) = self.known_host(&hostname) else {
                debug!("meta for unknown host {hostname}");
                continue;
            };
            Self::authorize(&self.senders.status, "meta", peer, Some(&ip))?;

            let Some(key) = self.store.key(&hostname, test, origin) else {
                debug!("meta for unknown record {hostname}.{test}");
                continue;
            };
            if let Some(record) = self.store.record_mut(&key) {
                record.set_meta(name, value);
            }
        }
        Ok(Reply::None)
    }

    pub(super) async fn handle_data(
        &mut self,
        msg: &str,
        peer: IpAddr,
        origin: &str,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let mut words = first_line(msg).split_whitespace().skip(1);
        let target = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("data without target")))?;
        let (hostname, test) = split_host_test(target)?;
        let sender = peer.to_string();
        let host = self.resolve_host(&hostname, &sender, now)?;
        Self::authorize(&self.senders.status, "data", peer, Some(&host.ip))?;

        let payload = format::data(origin, &host.name, test, host.info.as_ref(), msg);
        let envelope = Envelope::new("data", Some(&host.name), &sender, payload);
        self.channels.post(ChannelKind::Data, &envelope).await;
        Ok(Reply::None)
    }

    /// `notes HOST` and `usermsg HOST`
    pub(super) async fn handle_host_message(
        &mut self,
        msg: &str,
        peer: IpAddr,
        kind: ChannelKind,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let mut words = first_line(msg).split_whitespace().skip(1);
        let hostname = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("missing host name")))?;
        let sender = peer.to_string();
        let host = self.resolve_host(hostname, &sender, now)?;

        let (acl, marker) = match kind {
            ChannelKind::Notes => (&self.senders.maint, "notes"),
            _ => (&self.senders.status, "usermsg"),
        };
        Self::authorize(acl, marker, peer, Some(&host.ip))?;

        let envelope = Envelope::new(marker, Some(&host.name), &sender, format::host_message(&host.name, msg));
        self.channels.post(kind, &envelope).await;
        Ok(Reply::None)
    }

    /// `client HOST.OS [CLASS]`; replies with the matching client configuration
    pub(super) async fn handle_client(
        &mut self,
        msg: &str,
        peer: IpAddr,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let mut words = first_line(msg).split_whitespace().skip(1);
        let target = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("client without target")))?;
        let class = words.next();
        let (hostname, os) = split_host_test(target)?;

        let sender = client_proxy_ip(msg).unwrap_or_else(|| peer.to_string());
        let host = self.resolve_host(&hostname, &sender, now)?;
        Self::authorize(&self.senders.status, "client", peer, Some(&host.ip))?;

        let entry = self.store.find_or_create_host(&host.name, &host.ip, host.kind);
        entry.client = Some(ClientReport {
            message: msg.to_string(),
            timestamp: now,
            posted: false,
        });
        self.registry.set_client_info(&host.name, os, class);

        let class = class
            .map(str::to_string)
            .or_else(|| host.info.as_ref().and_then(|info| info.class.clone()))
            .unwrap_or_else(|| os.to_string());
        let payload = format::client(&host.name, os, &class, msg);
        let envelope = Envelope::new("client", Some(&host.name), &sender, payload);
        self.channels.post(ChannelKind::Client, &envelope).await;

        let reply = self
            .client_config
            .lookup(&host.name, os, &class)
            .map(str::to_string)
            .unwrap_or_default();
        Ok(Reply::text_or_none(reply))
    }

    /// `notify HOST.TEST\ntext`, passed to the page channel
    pub(super) async fn handle_notify(
        &mut self,
        msg: &str,
        peer: IpAddr,
        now: i64,
    ) -> ProtocolResult<Reply> {
        let mut words = first_line(msg).split_whitespace().skip(1);
        let target = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("notify without target")))?;
        let (hostname, test) = split_host_test(target)?;
        let sender = peer.to_string();
        let host = self.resolve_host(&hostname, &sender, now)?;
        Self::authorize(&self.senders.maint, "notify", peer, Some(&host.ip))?;

        let text = msg_data(msg).unwrap_or("");
        let payload = format::notify(&host.name, test, host.info.as_ref(), text);
        let envelope = Envelope::new("notify", Some(&host.name), &sender, payload);
        self.channels.post(ChannelKind::Page, &envelope).await;
        Ok(Reply::None)
    }
}
