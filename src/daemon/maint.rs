//! Maintenance and administration: enable, disable, ack, ackinfo, drop,
//! rename and schedule

use std::io::Write as _;
use std::net::IpAddr;

use chrono::{Local, TimeZone};
use tracing::{debug, info, warn};

use super::Daemon;
use crate::channels::{ChannelKind, Envelope, format};
use crate::color::{Classification, Color};
use crate::protocol::{ProtocolError, ProtocolResult, Reply, split_host_test};
use crate::store::intern::WILDCARD_TEST;
use crate::store::{AckInfo, RecordKey};
use crate::util::{DISABLED_UNTIL_OK, duration_minutes, first_line, next_word, nlencode};

const DEFAULT_DISABLE_REASON: &str = "(No reason given)";

/// AckInfo validity used for `-1`
const ACKINFO_FOREVER: i64 = 365 * 86400;

/// `host.test`, `host.*` or a bare `host`
fn split_target(target: &str) -> (String, Option<&str>) {
    match split_host_test(target) {
        Ok((host, test)) if test != WILDCARD_TEST => (host, Some(test)),
        Ok((host, _)) => (host, None),
        Err(_) => (target.replace(',', "."), None),
    }
}

impl Daemon {
    /// Records addressed by an enable/disable/ackinfo target
    fn target_records(&self, host: &str, test: Option<&str>) -> Vec<RecordKey> {
        match test {
            Some(test) => self.store.records_for_test(host, test),
            None => self
                .store
                .host(host)
                .map(|entry| {
                    entry
                        .records
                        .iter()
                        .map(|r| RecordKey {
                            host: host.to_string(),
                            test: r.test,
                            origin: r.origin,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn maint_target(&self, target: &str, peer: IpAddr, command: &'static str) -> ProtocolResult<(String, Option<String>)> {
        let (hostname, test) = split_target(target);
        let (hostname, ip) = self
            .known_host(&hostname)
            .ok_or_else(|| ProtocolError::UnknownHost(hostname.clone()))?;
        Self::authorize(&self.senders.maint, command, peer, Some(&ip))?;
        Ok((hostname, test.map(str::to_string)))
    }

    /// `disable TARGET DURATION [REASON]`; a duration of `-1` lasts until OK
    pub(super) async fn handle_disable(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(msg);
        let (target, rest) = next_word(rest);
        let (duration, reason) = next_word(rest);
        if target.is_empty() {
            return Err(ProtocolError::Malformed(String::from("disable without target")));
        }
        let enabled_at = match duration {
            "-1" => DISABLED_UNTIL_OK,
            d => now
                + duration_minutes(d)
                    .ok_or_else(|| ProtocolError::Malformed(format!("bad disable duration '{d}'")))?
                    * 60,
        };
        let reason = if reason.trim().is_empty() {
            DEFAULT_DISABLE_REASON
        } else {
            reason.trim_end()
        };

        let (hostname, test) = self.maint_target(target, peer, "disable")?;
        let keys = self.target_records(&hostname, test.as_deref());
        if keys.is_empty() {
            return Err(ProtocolError::Malformed(format!("nothing to disable for {target}")));
        }

        let sender = peer.to_string();
        for key in keys {
            if let Some(record) = self.store.record_mut(&key) {
                record.enabled_at = enabled_at;
                record.dismsg = Some(reason.to_string());
            }
            self.post_enadis(&key, &sender).await;
            self.reapply(&key, Color::DISABLED, &sender, now).await;
        }
        info!("disabled {target} until {enabled_at}");
        Ok(Reply::None)
    }

    /// `enable TARGET`
    pub(super) async fn handle_enable(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(msg);
        let (target, _) = next_word(rest);
        if target.is_empty() {
            return Err(ProtocolError::Malformed(String::from("enable without target")));
        }
        let (hostname, test) = self.maint_target(target, peer, "enable")?;
        let keys = self.target_records(&hostname, test.as_deref());
        if keys.is_empty() {
            return Err(ProtocolError::Malformed(format!("nothing to enable for {target}")));
        }

        let sender = peer.to_string();
        for key in keys {
            let Some(record) = self.store.record_mut(&key) else {
                continue;
            };
            record.enabled_at = 0;
            record.dismsg = None;
            let reported = crate::protocol::parse_status_header(&record.message)
                .ok()
                .and_then(|header| header.color)
                .unwrap_or(record.color);
            self.post_enadis(&key, &sender).await;
            self.reapply(&key, reported, &sender, now).await;
        }
        Ok(Reply::None)
    }

    async fn post_enadis(&self, key: &RecordKey, sender: &str) {
        let Some(record) = self.store.record(key) else {
            return;
        };
        let payload = format::enable_disable(&key.host, self.store.test_name(key.test), record.enabled_at);
        let envelope = Envelope::new("enadis", Some(&key.host), sender, payload);
        self.channels.post(ChannelKind::EnableDisable, &envelope).await;
    }

    /// `ack COOKIE DURATION TEXT`, `hobbitdack COOKIE DURATION TEXT` or
    /// `ack ack_event COOKIE DURATION TEXT`
    pub(super) async fn handle_ack(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        let (keyword, mut rest) = next_word(msg);
        if keyword == "ack" {
            let (event, after) = next_word(rest);
            if event == "ack_event" {
                rest = after;
            }
        }
        let (cookie, rest) = next_word(rest);
        let (duration, text) = next_word(rest);
        let cookie: i32 = cookie
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad cookie '{cookie}'")))?;
        let minutes = duration_minutes(duration)
            .ok_or_else(|| ProtocolError::Malformed(format!("bad ack duration '{duration}'")))?;

        let found = self
            .store
            .find_by_cookie(cookie.saturating_abs(), now)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown or expired cookie {cookie}")))?;
        let ip = self.store.host(&found.host).map(|h| h.ip.clone()).unwrap_or_default();
        Self::authorize(&self.senders.maint, "ack", peer, Some(&ip))?;

        let keys = if cookie < 0 {
            self.store
                .host(&found.host)
                .map(|host| {
                    host.records
                        .iter()
                        .filter(|r| r.cookie.is_some_and(|c| c.expires >= now))
                        .map(|r| RecordKey {
                            host: found.host.clone(),
                            test: r.test,
                            origin: r.origin,
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            vec![found]
        };

        let sender = peer.to_string();
        let ack_until = now + minutes * 60;
        for key in keys {
            let Some(record) = self.store.record_mut(&key) else {
                continue;
            };
            record.ack_until = ack_until;
            record.valid_until = record.valid_until.max(ack_until);
            record.ackmsg = Some(text.trim_end().to_string());
            debug!("acked {}.{} until {ack_until}", key.host, self.store.test_name(key.test));

            let envelope = {
                let (Some(host), Some(record)) = (self.store.host(&key.host), self.store.record(&key)) else {
                    continue;
                };
                let info = self.registry.resolve(&key.host);
                let view = format::RecordView {
                    host,
                    record,
                    test: self.store.test_name(key.test),
                    origin: self.store.origin_name(key.origin),
                    info: info.as_ref(),
                };
                Envelope::new("ack", Some(&key.host), &sender, format::ack(&view))
            };
            self.channels.post(ChannelKind::Page, &envelope).await;
        }
        Ok(Reply::None)
    }

    /// `ackinfo HOST.TEST\nLEVEL\nVALIDSECS\nACKEDBY\nMESSAGE`
    pub(super) fn handle_ackinfo(&mut self, msg: &str, peer: IpAddr, now: i64) -> ProtocolResult<Reply> {
        let mut lines = msg.splitn(5, '\n');
        let header = lines.next().unwrap_or_default();
        let malformed = || ProtocolError::Malformed(String::from("incomplete ackinfo"));
        let level: i32 = lines.next().and_then(|l| l.trim().parse().ok()).ok_or_else(malformed)?;
        let valid: i64 = lines.next().and_then(|l| l.trim().parse().ok()).ok_or_else(malformed)?;
        let acked_by = lines.next().map(str::trim).ok_or_else(malformed)?.to_string();
        let message = lines.next().unwrap_or_default().trim_end().to_string();

        let (_, target) = next_word(first_line(header));
        let (hostname, test) = self.maint_target(target.trim(), peer, "ackinfo")?;
        let keys: Vec<RecordKey> = match test.as_deref() {
            Some(test) => self.store.records_for_test(&hostname, test),
            None => self
                .target_records(&hostname, None)
                .into_iter()
                .filter(|key| {
                    self.store
                        .record(key)
                        .is_some_and(|r| self.policy.classify(r.color) != Classification::Ok)
                })
                .collect(),
        };
        if keys.is_empty() {
            return Err(ProtocolError::Malformed(format!("no records for ackinfo {target}")));
        }

        let valid = if valid == -1 { ACKINFO_FOREVER } else { valid };
        let valid_until = now
            .checked_add(valid)
            .ok_or_else(|| ProtocolError::Malformed(format!("ackinfo validity {valid} out of range")))?;
        for key in keys {
            let ack = AckInfo {
                level,
                received: now,
                valid_until,
                clear_time: valid_until,
                acked_by: acked_by.clone(),
                message: message.clone(),
            };
            let Some(record) = self.store.record_mut(&key) else {
                continue;
            };
            record.upsert_ack(ack);
            let last_change = record.last_change;
            self.log_ack(&key, level, &acked_by, last_change, now, valid_until, &message);
        }
        Ok(Reply::None)
    }

    #[allow(clippy::too_many_arguments)]
    fn log_ack(
        &mut self,
        key: &RecordKey,
        level: i32,
        acked_by: &str,
        last_change: i64,
        received: i64,
        valid_until: i64,
        message: &str,
    ) {
        let Some(path) = &self.config.ack_log else {
            return;
        };
        let stamp = Local
            .timestamp_opt(received, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let line = format!(
            "{stamp} {} {} {acked_by} {level} {last_change} {received} {valid_until} {}\n",
            key.host,
            self.store.test_name(key.test),
            nlencode(message)
        );
        let written = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = written {
            warn!("cannot append to ack log {}: {e}", path.display());
            self.stats.record_error(format!("ack log {}: {e}", path.display()));
        }
    }

    fn admin_host_ip(&self, hostname: &str) -> Option<String> {
        self.known_host(hostname).map(|(_, ip)| ip)
    }

    /// `drop HOST [TEST]`
    pub(super) async fn handle_drop(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        let mut words = first_line(msg).split_whitespace().skip(1);
        let hostname = words
            .next()
            .ok_or_else(|| ProtocolError::Malformed(String::from("drop without host")))?;
        let test = words.next();
        let ip = self.admin_host_ip(hostname);
        Self::authorize(&self.senders.admin, "drop", peer, ip.as_deref())?;

        let sender = peer.to_string();
        match test {
            Some(test) => {
                self.post_marker("droptest", &sender, format::control(&[hostname, test])).await;
                if let Err(e) = self.store.drop_test(hostname, test) {
                    debug!("drop {hostname}.{test}: {e}");
                }
            }
            None => {
                self.post_marker("drophost", &sender, format::control(&[hostname])).await;
                if let Err(e) = self.store.drop_host(hostname) {
                    debug!("drop {hostname}: {e}");
                }
            }
        }
        Ok(Reply::None)
    }

    /// `rename HOST NEWHOST` or `rename HOST OLDTEST NEWTEST`
    pub(super) async fn handle_rename(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        let words: Vec<&str> = first_line(msg).split_whitespace().skip(1).collect();
        let hostname = words
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::Malformed(String::from("rename without host")))?;
        let ip = self.admin_host_ip(hostname);
        Self::authorize(&self.senders.admin, "rename", peer, ip.as_deref())?;

        let sender = peer.to_string();
        match words[1..] {
            [new_host] => {
                self.post_marker("renamehost", &sender, format::control(&[hostname, new_host])).await;
                if let Err(e) = self.store.rename_host(hostname, new_host) {
                    debug!("rename {hostname}: {e}");
                }
            }
            [old_test, new_test] => {
                self.post_marker("renametest", &sender, format::control(&[hostname, old_test, new_test]))
                    .await;
                if let Err(e) = self.store.rename_test(hostname, old_test, new_test) {
                    debug!("rename {hostname}.{old_test}: {e}");
                }
            }
            _ => return Err(ProtocolError::Malformed(String::from("rename needs one or two names"))),
        }
        Ok(Reply::None)
    }

    /// `schedule`, `schedule cancel ID` or `schedule TIME COMMAND`
    pub(super) fn handle_schedule(&mut self, msg: &str, peer: IpAddr) -> ProtocolResult<Reply> {
        let (_, rest) = next_word(msg);
        let (first, command) = next_word(rest);
        if first.is_empty() {
            return Ok(Reply::text_or_none(self.scheduler.listing()));
        }
        Self::authorize(&self.senders.maint, "schedule", peer, None)?;

        if first == "cancel" {
            let (id, _) = next_word(command);
            let id: u32 = id
                .parse()
                .map_err(|_| ProtocolError::Malformed(format!("bad task id '{id}'")))?;
            if !self.scheduler.cancel(id) {
                debug!("no scheduled task {id}");
            }
            return Ok(Reply::None);
        }

        let at: i64 = first
            .parse()
            .map_err(|_| ProtocolError::Malformed(format!("bad schedule time '{first}'")))?;
        if command.trim().is_empty() {
            return Err(ProtocolError::Malformed(String::from("schedule without command")));
        }
        let id = self.scheduler.schedule(at, &peer.to_string(), command);
        debug!("scheduled task {id} at {at}");
        Ok(Reply::None)
    }

    /// Re-inject due scheduled tasks through the dispatcher
    pub(super) async fn run_due_tasks(&mut self, now: i64) {
        for task in self.scheduler.take_due(now) {
            let peer = task.sender.parse().unwrap_or_else(|_| {
                warn!("task {} has unparsable sender {}", task.id, task.sender);
                IpAddr::from([127, 0, 0, 1])
            });
            debug!("running scheduled task {} from {}", task.id, task.sender);
            let _ = self.dispatch(&task.command, peer, "", now).await;
        }
    }
}
