//! Read-only requests: query, board snapshots, logs, host info, client
//! logs, ghosts, file downloads and channel attachment

use std::fmt::Write as _;
use std::net::IpAddr;

use tracing::debug;

use super::Daemon;
use crate::board::{
    BoardRequest, DEFAULT_BOARD_FIELDS, DEFAULT_HOSTINFO_FIELDS, DEFAULT_LOG_FIELDS, Field, Row,
    XML_HEADER, render_row, server_status_xml, xml_document,
};
use crate::channels::ChannelKind;
use crate::color::Color;
use crate::protocol::{ProtocolError, ProtocolResult, Reply, split_host_test};
use crate::registry::HostInfo;
use crate::store::{OriginId, RecordKey, StatusRecord, StoreError, TestId};
use crate::util::{first_line, msg_data, next_word};

/// Only the named `[section]` blocks of a client report
fn client_sections(report: &str, names: &[&str]) -> String {
    let mut out = String::new();
    let mut keep = false;
    for line in report.lines() {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.split_once(']')).map(|(n, _)| n) {
            keep = names.contains(&name);
        }
        if keep {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn hostinfo_field(field: &Field, info: &HostInfo) -> String {
    match field {
        Field::HostName => info.name.clone(),
        Field::Host(name) => info.attribute(name).unwrap_or_default(),
        _ => String::new(),
    }
}

impl Daemon {
    /// Record a single-record request refers to, preferring the default origin
    fn lookup_key(&self, hostname: &str, test: &str) -> Option<RecordKey> {
        let name = self
            .known_host(hostname)
            .map_or_else(|| hostname.to_string(), |(name, _)| name);
        let mut keys = self.store.records_for_test(&name, test);
        let default = self.store.origins.default_origin();
        keys.sort_by_key(|key| key.origin != default);
        keys.into_iter().next()
    }

    fn synthetic_record(test: TestId, origin: OriginId, now: i64) -> StatusRecord {
        let mut record = StatusRecord::new(test, origin);
        record.color = Color::Green;
        record.log_time = now;
        record.valid_until = now;
        record
    }

    /// `query HOST.TEST`: `COLOR text\n`
    pub(super) fn handle_query(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(first_line(msg));
        let (target, _) = next_word(rest);
        let (hostname, test) = split_host_test(target)?;
        let (_, ip) = self
            .known_host(&hostname)
            .ok_or_else(|| ProtocolError::UnknownHost(hostname.clone()))?;
        Self::authorize(&self.senders.status, "query", peer, Some(&ip))?;

        let Some(record) = self.lookup_key(&hostname, test).and_then(|key| self.store.record(&key)) else {
            return Ok(Reply::None);
        };
        let line = first_line(msg_data(&record.message).unwrap_or(""));
        let (_, text) = next_word(line);
        Ok(Reply::Text(format!("{} {}\n", record.color, text)))
    }

    fn single_record(&mut self, msg: &str, default_fields: &str, now: i64) -> ProtocolResult<(BoardRequest, RecordKey)> {
        let (_, rest) = next_word(first_line(msg));
        let request = BoardRequest::parse(rest, default_fields)?;
        let (hostname, test) = request
            .target
            .as_ref()
            .ok_or_else(|| ProtocolError::Malformed(String::from("missing host.test")))?;
        let key = self
            .lookup_key(hostname, test)
            .ok_or_else(|| ProtocolError::Malformed(format!("no record for {hostname}.{test}")))?;
        if let Some(record) = self.store.record_mut(&key) {
            record.flush_acks(now);
        }
        Ok((request, key))
    }

    /// `hobbitdlog HOST.TEST [fields=...]`
    pub(super) fn handle_log(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "hobbitdlog", peer, None)?;
        let (request, key) = self.single_record(msg, DEFAULT_LOG_FIELDS, now)?;
        let (Some(host), Some(record)) = (self.store.host(&key.host), self.store.record(&key)) else {
            return Ok(Reply::None);
        };
        let info = self.registry.resolve(&key.host);
        let row = Row {
            host,
            test: self.store.test_name(key.test),
            record,
            info: info.as_ref(),
        };
        Ok(Reply::Text(format!(
            "{}\n{}",
            render_row(&request.fields, &row, request.acklevel, now),
            msg_data(&record.message).unwrap_or("")
        )))
    }

    /// `hobbitdxlog HOST.TEST`
    pub(super) fn handle_xlog(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "hobbitdxlog", peer, None)?;
        let (_, key) = self.single_record(msg, DEFAULT_LOG_FIELDS, now)?;
        let (Some(host), Some(record)) = (self.store.host(&key.host), self.store.record(&key)) else {
            return Ok(Reply::None);
        };
        let info = self.registry.resolve(&key.host);
        let row = Row {
            host,
            test: self.store.test_name(key.test),
            record,
            info: info.as_ref(),
        };
        Ok(Reply::Text(format!("{XML_HEADER}{}", server_status_xml(&row, now))))
    }

    /// `hobbitdboard` and `hobbitdxboard`
    pub(super) fn handle_board(&mut self, msg: &str, peer: IpAddr, now: i64, xml: bool) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "hobbitdboard", peer, None)?;
        let (_, rest) = next_word(first_line(msg));
        let request = BoardRequest::parse(rest, DEFAULT_BOARD_FIELDS)?;

        for host in self.store.hosts_mut() {
            for record in &mut host.records {
                record.flush_acks(now);
            }
        }

        let origin = self.store.origins.default_origin();
        let mut out = String::new();
        for host in self.store.hosts() {
            let info = if host.is_summary() {
                if request.has_host_filter() || !request.matches_host(&host.name, None) {
                    continue;
                }
                None
            } else {
                let Some(info) = self.registry.resolve(&host.name) else {
                    debug!("{} is in the store but not in the registry", host.name);
                    continue;
                };
                if !request.matches_host(&host.name, Some(&info)) {
                    continue;
                }
                Some(info)
            };

            let mut synthetic = vec![];
            if let Some(info) = &info {
                if !info.notrends {
                    synthetic.push(Self::synthetic_record(self.trends_test, origin, now));
                }
                if !info.noinfo {
                    synthetic.push(Self::synthetic_record(self.info_test, origin, now));
                }
            }

            let mut records: Vec<&StatusRecord> = host
                .records
                .iter()
                .filter(|r| synthetic.iter().all(|s| s.test != r.test))
                .collect();
            records.sort_by_key(|r| self.store.test_name(r.test));

            let rows = synthetic.iter().chain(records).map(|record| Row {
                host,
                test: self.store.test_name(record.test),
                record,
                info: info.as_ref(),
            });
            for row in rows.filter(|row| request.matches_test(row.test, row.record)) {
                if xml {
                    out.push_str(&server_status_xml(&row, now));
                } else {
                    out.push_str(&render_row(&request.fields, &row, request.acklevel, now));
                    out.push('\n');
                }
            }
        }

        if xml {
            Ok(Reply::Text(xml_document("StatusBoard", &out)))
        } else {
            Ok(Reply::text_or_none(out))
        }
    }

    /// `hostinfo [filters] [fields=BBH_...]`
    pub(super) fn handle_hostinfo(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "hostinfo", peer, None)?;
        let (_, rest) = next_word(first_line(msg));
        let request = BoardRequest::parse(rest, DEFAULT_HOSTINFO_FIELDS)?;

        let out = self
            .registry
            .hosts()
            .iter()
            .filter(|info| request.matches_host(&info.name, Some(*info)))
            .fold(String::new(), |mut out, info| {
                let line: Vec<String> = request.fields.iter().map(|f| hostinfo_field(f, info)).collect();
                let _ = writeln!(out, "{}", line.join("|"));
                out
            });
        Ok(Reply::text_or_none(out))
    }

    /// `clientlog HOST [section=a,b]`
    pub(super) fn handle_clientlog(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "clientlog", peer, None)?;
        let mut words = first_line(msg).split_whitespace().skip(1);
        let hostname = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("clientlog without host")))?;
        let sections: Option<Vec<&str>> = words
            .find_map(|word| word.strip_prefix("section="))
            .map(|list| list.split(',').collect());

        let name = self
            .known_host(hostname)
            .map_or_else(|| hostname.to_string(), |(name, _)| name);
        let Some(report) = self.store.host(&name).and_then(|host| host.client.as_ref()) else {
            return Ok(Reply::None);
        };
        let text = match sections {
            Some(names) => client_sections(&report.message, &names),
            None => report.message.clone(),
        };
        Ok(Reply::text_or_none(text))
    }

    pub(super) fn handle_ghostlist(&mut self, peer: IpAddr) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.www, "ghostlist", peer, None)?;
        let out = self.store.ghosts.iter().fold(String::new(), |mut out, (name, ghost)| {
            let _ = writeln!(out, "{name}|{}|{}", ghost.sender, ghost.seen);
            out
        });
        Ok(Reply::text_or_none(out))
    }

    /// `config NAME` and `download NAME`
    pub(super) fn handle_file(&mut self, msg: &str, peer: IpAddr, download: bool) -> ProtocolResult<Reply> {
        let command = if download { "download" } else { "config" };
        Self::authorize(&self.senders.status, command, peer, None)?;
        let (_, rest) = next_word(msg);
        let (name, _) = next_word(rest);

        if download && !self.config.allow_downloads {
            debug!("downloads are disabled");
            return Ok(Reply::None);
        }
        let root = if download {
            self.config.download_dir.clone()
        } else {
            self.config.config_dir.clone()
        };
        let Some(root) = root else {
            debug!("no directory configured for {command}");
            return Ok(Reply::None);
        };

        match self.store.files.load(&root, name) {
            Ok(content) => Ok(Reply::Bytes(content)),
            Err(StoreError::Rejected(reason)) => Err(ProtocolError::Malformed(reason)),
            Err(e) => {
                debug!("cannot serve {command} {name}: {e}");
                Ok(Reply::None)
            }
        }
    }

    /// `flush filecache`
    pub(super) fn handle_flush(&mut self, msg: &str) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(msg);
        let (what, _) = next_word(rest);
        if what != "filecache" {
            return Err(ProtocolError::Malformed(format!("cannot flush '{what}'")));
        }
        self.store.files.flush();
        Ok(Reply::None)
    }

    /// `channel NAME` turns the connection into a subscription
    pub(super) fn handle_channel(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        Self::authorize(&self.senders.admin, "channel", peer, None)?;
        let (_, rest) = next_word(msg);
        let (name, _) = next_word(rest);
        ChannelKind::from_name(name)
            .map(Reply::Subscribe)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown channel '{name}'")))
    }
}
