//! Board snapshots: filtered, field-selectable views of the store
//!
//! Used by `hobbitdboard`, `hobbitdxboard`, `hobbitdlog`, `hobbitdxlog` and
//! `hostinfo`.

use std::fmt::Write;

use regex::Regex;

use crate::color::ColorSet;
use crate::protocol::{ProtocolError, ProtocolResult, query_options, split_host_test};
use crate::registry::HostInfo;
use crate::store::{Host, StatusRecord};
use crate::util::{first_line, msg_data, nlencode, timestr};

pub const DEFAULT_BOARD_FIELDS: &str =
    "hostname,testname,color,flags,lastchange,logtime,validtime,acktime,disabletime,sender,cookie,line1";

pub const DEFAULT_LOG_FIELDS: &str =
    "hostname,testname,color,flags,lastchange,logtime,validtime,acktime,disabletime,sender,cookie,ackmsg,dismsg,client";

pub const DEFAULT_HOSTINFO_FIELDS: &str = "BBH_HOSTNAME,BBH_IP,BBH_RAW";

pub const XML_HEADER: &str = "<?xml version='1.0' encoding='ISO-8859-1'?>\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    HostName,
    TestName,
    Color,
    Flags,
    LastChange,
    LogTime,
    ValidTime,
    AckTime,
    DisableTime,
    Sender,
    Cookie,
    Line1,
    AckMsg,
    DisMsg,
    Msg,
    Client,
    ClientStamp,
    AckList,
    /// `BBH_*` registry attribute
    Host(String),
}

impl Field {
    pub fn parse(name: &str) -> Option<Field> {
        let field = match name {
            "hostname" => Field::HostName,
            "testname" => Field::TestName,
            "color" => Field::Color,
            "flags" => Field::Flags,
            "lastchange" => Field::LastChange,
            "logtime" => Field::LogTime,
            "validtime" => Field::ValidTime,
            "acktime" => Field::AckTime,
            "disabletime" => Field::DisableTime,
            "sender" => Field::Sender,
            "cookie" => Field::Cookie,
            "line1" => Field::Line1,
            "ackmsg" => Field::AckMsg,
            "dismsg" => Field::DisMsg,
            "msg" => Field::Msg,
            "client" => Field::Client,
            "clntstamp" => Field::ClientStamp,
            "acklist" => Field::AckList,
            bbh if bbh.starts_with("BBH_") => Field::Host(bbh.to_string()),
            _ => return None,
        };
        Some(field)
    }
}

/// Known fields of a comma list; unknown names are ignored
pub fn parse_fields(list: &str) -> Vec<Field> {
    list.split(',').filter_map(|name| Field::parse(name.trim())).collect()
}

/// One row of a board: a real record or a synthetic info/trends entry
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub host: &'a Host,
    pub test: &'a str,
    pub record: &'a StatusRecord,
    pub info: Option<&'a HostInfo>,
}

/// `received:validuntil:level:ackedby:msg` lines at or above `min_level`
pub fn acklist(record: &StatusRecord, min_level: Option<i32>) -> String {
    record
        .acks
        .iter()
        .filter(|ack| min_level.is_none_or(|level| ack.level >= level))
        .fold(String::new(), |mut out, ack| {
            let _ = writeln!(
                out,
                "{}:{}:{}:{}:{}",
                ack.received, ack.valid_until, ack.level, ack.acked_by, ack.message
            );
            out
        })
}

pub fn render_field(field: &Field, row: &Row<'_>, acklevel: Option<i32>, now: i64) -> String {
    let r = row.record;
    match field {
        Field::HostName => row.host.name.clone(),
        Field::TestName => row.test.to_string(),
        Field::Color => r.color.name().to_string(),
        Field::Flags => r.flags.clone(),
        Field::LastChange => r.last_change.to_string(),
        Field::LogTime => r.log_time.to_string(),
        Field::ValidTime => r.valid_until.to_string(),
        Field::AckTime => r.ack_until.to_string(),
        Field::DisableTime => r.enabled_at.to_string(),
        Field::Sender => r.sender.clone(),
        Field::Cookie => r.cookie_id().to_string(),
        Field::Line1 => first_line(msg_data(&r.message).unwrap_or("")).to_string(),
        Field::AckMsg => match &r.ackmsg {
            Some(msg) if r.is_acked(now) => nlencode(msg),
            _ => String::new(),
        },
        Field::DisMsg => match &r.dismsg {
            Some(msg) if r.is_disabled(now) || r.downtime_active => nlencode(msg),
            _ => String::new(),
        },
        Field::Msg => nlencode(&r.message),
        Field::Client => if row.host.client.is_some() { "Y" } else { "N" }.to_string(),
        Field::ClientStamp => row.host.client_timestamp().to_string(),
        Field::AckList => nlencode(&acklist(r, acklevel)),
        Field::Host(name) => row
            .info
            .and_then(|info| info.attribute(name))
            .unwrap_or_default(),
    }
}

pub fn render_row(fields: &[Field], row: &Row<'_>, acklevel: Option<i32>, now: i64) -> String {
    fields
        .iter()
        .map(|field| render_field(field, row, acklevel, now))
        .collect::<Vec<_>>()
        .join("|")
}

fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]&gt;"))
}

/// `<ServerStatus>` element for one record
pub fn server_status_xml(row: &Row<'_>, now: i64) -> String {
    let r = row.record;
    let mut out = String::new();
    out.push_str("  <ServerStatus>\n");
    let _ = writeln!(out, "    <ServerName>{}</ServerName>", row.host.name);
    let _ = writeln!(out, "    <Type>{}</Type>", row.test);
    let _ = writeln!(out, "    <Status>{}</Status>", r.color);
    let _ = writeln!(out, "    <TestFlags>{}</TestFlags>", r.flags);
    let _ = writeln!(out, "    <LastChange>{}</LastChange>", timestr(r.last_change));
    let _ = writeln!(out, "    <LogTime>{}</LogTime>", timestr(r.log_time));
    let _ = writeln!(out, "    <ValidTime>{}</ValidTime>", timestr(r.valid_until));
    let _ = writeln!(out, "    <AckTime>{}</AckTime>", timestr(r.ack_until));
    let _ = writeln!(out, "    <DisableTime>{}</DisableTime>", timestr(r.enabled_at.max(0)));
    let _ = writeln!(out, "    <Sender>{}</Sender>", r.sender);
    match r.cookie_id() {
        id if id > 0 => {
            let _ = writeln!(out, "    <Cookie>{id}</Cookie>");
        }
        _ => out.push_str("    <Cookie>N/A</Cookie>\n"),
    }
    match r.ackmsg.as_deref().filter(|_| r.is_acked(now)) {
        Some(msg) => {
            let _ = writeln!(out, "    <AckMsg>{}</AckMsg>", cdata(msg));
        }
        None => out.push_str("    <AckMsg>N/A</AckMsg>\n"),
    }
    match r.dismsg.as_deref().filter(|_| r.is_disabled(now)) {
        Some(msg) => {
            let _ = writeln!(out, "    <DisMsg>{}</DisMsg>", cdata(msg));
        }
        None => out.push_str("    <DisMsg>N/A</DisMsg>\n"),
    }
    let _ = writeln!(
        out,
        "    <Message>{}</Message>",
        cdata(msg_data(&r.message).unwrap_or(""))
    );
    for (name, value) in &r.metas {
        let _ = writeln!(out, "    <{name}>\n{value}</{name}>");
    }
    out.push_str("  </ServerStatus>\n");
    out
}

pub fn xml_document(root: &str, body: &str) -> String {
    format!("{XML_HEADER}<{root}>\n{body}</{root}>\n")
}

/// Parsed filter and field options of a board-style request
#[derive(Debug, Default)]
pub struct BoardRequest {
    pub page: Option<Regex>,
    pub host: Option<Regex>,
    pub net: Option<Regex>,
    pub test: Option<Regex>,
    pub colors: Option<ColorSet>,
    pub acklevel: Option<i32>,
    pub fields: Vec<Field>,
    /// Restrict to a single `host.test`
    pub target: Option<(String, String)>,
}

fn regex_option(value: &str) -> ProtocolResult<Regex> {
    Regex::new(value).map_err(|e| ProtocolError::Malformed(format!("bad filter '{value}': {e}")))
}

impl BoardRequest {
    pub fn parse(rest: &str, default_fields: &str) -> ProtocolResult<Self> {
        let mut request = BoardRequest::default();
        let mut fields = None;
        for (name, value) in query_options(rest) {
            match name {
                "page" => request.page = Some(regex_option(value)?),
                "host" => request.host = Some(regex_option(value)?),
                "net" => request.net = Some(regex_option(value)?),
                "test" => request.test = Some(regex_option(value)?),
                "color" => request.colors = Some(ColorSet::parse_list(value)),
                "acklevel" => request.acklevel = value.parse().ok(),
                "fields" => fields = Some(parse_fields(value)),
                _ => {}
            }
        }
        if let Some(target) = rest.split_whitespace().find(|word| !word.contains('=')) {
            let (host, test) = split_host_test(target)?;
            request.target = Some((host, test.to_string()));
        }
        request.fields = fields.unwrap_or_else(|| parse_fields(default_fields));
        Ok(request)
    }

    pub fn has_host_filter(&self) -> bool {
        self.page.is_some() || self.host.is_some() || self.net.is_some()
    }

    pub fn matches_host(&self, name: &str, info: Option<&HostInfo>) -> bool {
        if let Some(re) = &self.host {
            if !re.is_match(name) {
                return false;
            }
        }
        if let Some(re) = &self.page {
            let pages = info.map(|i| i.page_paths.as_slice()).unwrap_or(&[]);
            let any = if pages.is_empty() {
                re.is_match("")
            } else {
                pages.iter().any(|page| re.is_match(page))
            };
            if !any {
                return false;
            }
        }
        if let Some(re) = &self.net {
            let net = info.and_then(|i| i.net.as_deref()).unwrap_or("");
            if !re.is_match(net) {
                return false;
            }
        }
        if let Some((host, _)) = &self.target {
            if host != name {
                return false;
            }
        }
        true
    }

    pub fn matches_test(&self, test: &str, record: &StatusRecord) -> bool {
        if let Some(re) = &self.test {
            if !re.is_match(test) {
                return false;
            }
        }
        if let Some(colors) = &self.colors {
            if !colors.contains(record.color) {
                return false;
            }
        }
        if let Some((_, target)) = &self.target {
            if target != test {
                return false;
            }
        }
        true
    }
}
