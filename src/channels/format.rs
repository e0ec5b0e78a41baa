//! Wire layout of channel messages
//!
//! Every message is `@@MARKER#SEQ/HOST|SECS.MICROS|SENDER|PAYLOAD\n@@\n`,
//! where the payload layout depends on the category.

use crate::registry::HostInfo;
use crate::store::{Host, StatusRecord};
use crate::util::nlencode;

/// One channel message before it gets a sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub marker: &'static str,
    /// `None` for host-less markers, rendered as `*`
    pub host: Option<String>,
    pub sender: String,
    pub payload: String,
}

const TRAILER: &str = "\n@@\n";

impl Envelope {
    pub fn new(marker: &'static str, host: Option<&str>, sender: &str, payload: String) -> Self {
        Self {
            marker,
            host: host.map(str::to_string),
            sender: sender.to_string(),
            payload,
        }
    }

    /// Render with header and trailer; the flag reports truncation
    pub fn render(&self, seq: u32, secs: i64, micros: u32, capacity: usize) -> (String, bool) {
        let mut text = format!(
            "@@{}#{}/{}|{}.{:06}|{}|{}",
            self.marker,
            seq,
            self.host.as_deref().unwrap_or("*"),
            secs,
            micros,
            self.sender,
            self.payload
        );
        let limit = capacity.saturating_sub(TRAILER.len() + 1);
        let truncated = text.len() > limit;
        if truncated {
            let mut cut = limit;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        text.push_str(TRAILER);
        (text, truncated)
    }
}

/// A record together with everything its payloads mention
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    pub host: &'a Host,
    pub record: &'a StatusRecord,
    pub test: &'a str,
    pub origin: &'a str,
    pub info: Option<&'a HostInfo>,
}

impl RecordView<'_> {
    fn class(&self) -> &str {
        self.info.and_then(|i| i.class.as_deref()).unwrap_or("")
    }

    fn os(&self) -> &str {
        self.info.and_then(|i| i.os.as_deref()).unwrap_or("")
    }

    fn primary_page(&self) -> &str {
        self.info.map_or("", HostInfo::primary_page)
    }

    fn all_pages(&self) -> String {
        self.info.map(HostInfo::all_pages).unwrap_or_default()
    }
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(nlencode).unwrap_or_default()
}

pub fn status(view: &RecordView<'_>) -> String {
    let r = view.record;
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n{}",
        view.origin,
        view.host.name,
        view.test,
        r.valid_until,
        r.color,
        r.flags,
        r.old_color,
        r.last_change,
        r.ack_until,
        text(&r.ackmsg),
        r.enabled_at,
        text(&r.dismsg),
        view.host.client_timestamp(),
        view.class(),
        view.all_pages(),
        r.message
    )
}

pub fn status_change(view: &RecordView<'_>, previous_change: i64) -> String {
    let r = view.record;
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n{}",
        view.origin,
        view.host.name,
        view.test,
        r.valid_until,
        r.color,
        r.old_color,
        previous_change,
        r.enabled_at,
        text(&r.dismsg),
        u8::from(r.downtime_active),
        view.host.client_timestamp(),
        r.message
    )
}

pub fn client_change(host: &Host) -> String {
    let message = host.client.as_ref().map_or("", |c| c.message.as_str());
    format!("{}|{}\n{}", host.name, host.client_timestamp(), message)
}

pub fn page(view: &RecordView<'_>) -> String {
    let r = view.record;
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}\n{}",
        view.host.name,
        view.test,
        view.host.ip,
        r.valid_until,
        r.color,
        r.old_color,
        r.last_change,
        view.primary_page(),
        r.cookie_id(),
        view.os(),
        view.class(),
        r.groups.as_deref().unwrap_or(""),
        r.message
    )
}

pub fn ack(view: &RecordView<'_>) -> String {
    let r = view.record;
    format!(
        "{}|{}|{}|{}\n{}",
        view.host.name,
        view.test,
        view.host.ip,
        r.ack_until,
        r.ackmsg.as_deref().unwrap_or("")
    )
}

pub fn enable_disable(host: &str, test: &str, enabled_at: i64) -> String {
    format!("{host}|{test}|{enabled_at}")
}

/// Payload for the notes and user channels
pub fn host_message(host: &str, message: &str) -> String {
    format!("{host}\n{message}")
}

pub fn data(origin: &str, host: &str, test: &str, info: Option<&HostInfo>, message: &str) -> String {
    let class = info.and_then(|i| i.class.as_deref()).unwrap_or("");
    let pages = info.map(HostInfo::all_pages).unwrap_or_default();
    format!("{origin}|{host}|{test}|{class}|{pages}\n{message}")
}

pub fn client(host: &str, os: &str, class: &str, message: &str) -> String {
    format!("{host}|{os}|{class}\n{message}")
}

pub fn notify(host: &str, test: &str, info: Option<&HostInfo>, message: &str) -> String {
    let page = info.map_or("", HostInfo::primary_page);
    format!("{host}|{test}|{page}\n{message}")
}

/// Payload for drop/rename markers
pub fn control(fields: &[&str]) -> String {
    fields.join("|")
}
