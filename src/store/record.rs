//! Hosts, status records and acknowledgement entries

use crate::color::Color;

use super::intern::{OriginId, TestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKind {
    Normal,
    /// Synthetic aggregate host whose records are relayed, never paged
    Summary,
}

/// Raw client inventory report attached to a host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientReport {
    pub message: String,
    pub timestamp: i64,
    /// Set once a client-change event carried this report
    pub posted: bool,
}

#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub ip: String,
    pub kind: HostKind,
    pub records: Vec<StatusRecord>,
    pub client: Option<ClientReport>,
}

impl Host {
    pub fn new(name: &str, ip: &str, kind: HostKind) -> Self {
        Self {
            name: name.to_string(),
            ip: ip.to_string(),
            kind,
            records: vec![],
            client: None,
        }
    }

    pub fn record(&self, test: TestId, origin: OriginId) -> Option<&StatusRecord> {
        self.records
            .iter()
            .find(|r| r.test == test && r.origin == origin)
    }

    pub fn record_mut(&mut self, test: TestId, origin: OriginId) -> Option<&mut StatusRecord> {
        self.records
            .iter_mut()
            .find(|r| r.test == test && r.origin == origin)
    }

    /// First record for `test`, regardless of origin
    pub fn any_record(&self, test: TestId) -> Option<&StatusRecord> {
        self.records.iter().find(|r| r.test == test)
    }

    pub fn client_pending(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.posted)
    }

    pub fn client_timestamp(&self) -> i64 {
        self.client.as_ref().map_or(0, |c| c.timestamp)
    }

    pub fn is_summary(&self) -> bool {
        self.kind == HostKind::Summary
    }
}

/// Correlation token for out-of-band acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie {
    pub id: i32,
    pub expires: i64,
}

/// One acknowledging party's note on a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckInfo {
    pub level: i32,
    pub received: i64,
    pub valid_until: i64,
    /// Entries are flushed once this has passed
    pub clear_time: i64,
    pub acked_by: String,
    pub message: String,
}

impl AckInfo {
    pub fn is_expired(&self, now: i64) -> bool {
        self.clear_time < now || self.valid_until < now
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub test: TestId,
    pub origin: OriginId,
    pub color: Color,
    pub old_color: Color,
    pub flags: String,
    pub groups: Option<String>,
    pub sender: String,
    pub log_time: i64,
    pub last_change: i64,
    pub valid_until: i64,
    /// 0 when enabled, [`crate::util::DISABLED_UNTIL_OK`] for until-OK
    pub enabled_at: i64,
    pub ack_until: i64,
    pub message: String,
    pub dismsg: Option<String>,
    pub ackmsg: Option<String>,
    pub cookie: Option<Cookie>,
    pub metas: Vec<(String, String)>,
    pub acks: Vec<AckInfo>,
    pub active_alert: bool,
    pub history_synced: bool,
    pub downtime_active: bool,
}

impl StatusRecord {
    pub fn new(test: TestId, origin: OriginId) -> Self {
        Self {
            test,
            origin,
            color: Color::None,
            old_color: Color::None,
            flags: String::new(),
            groups: None,
            sender: String::new(),
            log_time: 0,
            last_change: 0,
            valid_until: 0,
            enabled_at: 0,
            ack_until: 0,
            message: String::new(),
            dismsg: None,
            ackmsg: None,
            cookie: None,
            metas: vec![],
            acks: vec![],
            active_alert: false,
            history_synced: false,
            downtime_active: false,
        }
    }

    pub fn cookie_id(&self) -> i32 {
        self.cookie.map_or(-1, |c| c.id)
    }

    pub fn cookie_expires(&self) -> i64 {
        self.cookie.map_or(0, |c| c.expires)
    }

    pub fn is_disabled(&self, now: i64) -> bool {
        self.enabled_at == crate::util::DISABLED_UNTIL_OK || self.enabled_at > now
    }

    pub fn is_acked(&self, now: i64) -> bool {
        self.ack_until > now
    }

    pub fn set_meta(&mut self, name: &str, value: &str) {
        match self.metas.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.metas.push((name.to_string(), value.to_string())),
        }
    }

    /// Add an ack entry, replacing one with the same level and acknowledger
    pub fn upsert_ack(&mut self, ack: AckInfo) {
        match self
            .acks
            .iter_mut()
            .find(|a| a.level == ack.level && a.acked_by == ack.acked_by)
        {
            Some(existing) => *existing = ack,
            None => self.acks.push(ack),
        }
    }

    pub fn flush_acks(&mut self, now: i64) {
        self.acks.retain(|a| !a.is_expired(now));
    }
}
