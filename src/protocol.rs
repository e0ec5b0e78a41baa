//! Wire protocol parsing
//!
//! A request is one text blob; its first word selects the handler.

use std::borrow::Cow;
use std::fmt;

use crate::channels::ChannelKind;
use crate::color::Color;
use crate::util::{duration_minutes, next_word};

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Reasons a request is rejected without a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Empty,
    UnknownCommand(String),
    Malformed(String),
    UnknownHost(String),
    Unauthorized { command: &'static str, sender: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty message"),
            ProtocolError::UnknownCommand(cmd) => write!(f, "unknown command '{}'", cmd),
            ProtocolError::Malformed(msg) => write!(f, "malformed message: {}", msg),
            ProtocolError::UnknownHost(host) => write!(f, "unknown host {}", host),
            ProtocolError::Unauthorized { command, sender } => {
                write!(f, "{} from {} rejected by sender list", command, sender)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

/// What goes back on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    None,
    Text(String),
    Bytes(Vec<u8>),
    /// Keep the connection open and stream this channel
    Subscribe(ChannelKind),
}

impl Reply {
    pub fn text_or_none(text: String) -> Self {
        if text.is_empty() { Reply::None } else { Reply::Text(text) }
    }
}

/// Request keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Status,
    Combo,
    Meta,
    Data,
    Summary,
    Notes,
    UserMsg,
    Enable,
    Disable,
    Ack,
    AckInfo,
    Drop,
    Rename,
    Config,
    Download,
    Flush,
    Query,
    Log,
    XLog,
    Board,
    XBoard,
    HostInfo,
    Client,
    ClientLog,
    GhostList,
    Ping,
    Notify,
    Schedule,
    Dummy,
    Channel,
}

impl Verb {
    /// Statistics bucket name
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Status => "status",
            Verb::Combo => "combo",
            Verb::Meta => "meta",
            Verb::Data => "data",
            Verb::Summary => "summary",
            Verb::Notes => "notes",
            Verb::UserMsg => "usermsg",
            Verb::Enable => "enable",
            Verb::Disable => "disable",
            Verb::Ack => "ack",
            Verb::AckInfo => "ackinfo",
            Verb::Drop => "drop",
            Verb::Rename => "rename",
            Verb::Config => "config",
            Verb::Download => "download",
            Verb::Flush => "flush",
            Verb::Query => "query",
            Verb::Log => "hobbitdlog",
            Verb::XLog => "hobbitdxlog",
            Verb::Board => "hobbitdboard",
            Verb::XBoard => "hobbitdxboard",
            Verb::HostInfo => "hostinfo",
            Verb::Client => "client",
            Verb::ClientLog => "clientlog",
            Verb::GhostList => "ghostlist",
            Verb::Ping => "ping",
            Verb::Notify => "notify",
            Verb::Schedule => "schedule",
            Verb::Dummy => "dummy",
            Verb::Channel => "channel",
        }
    }

    pub fn parse(msg: &str) -> ProtocolResult<Verb> {
        let (keyword, _) = next_word(msg);
        if keyword.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let verb = match keyword {
            k if k.starts_with("status") => Verb::Status,
            "combo" => Verb::Combo,
            "meta" => Verb::Meta,
            "data" => Verb::Data,
            "summary" => Verb::Summary,
            "notes" => Verb::Notes,
            "usermsg" => Verb::UserMsg,
            "enable" => Verb::Enable,
            "disable" => Verb::Disable,
            "hobbitdack" | "ack" => Verb::Ack,
            "ackinfo" => Verb::AckInfo,
            "drop" => Verb::Drop,
            "rename" => Verb::Rename,
            "config" => Verb::Config,
            "download" => Verb::Download,
            "flush" => Verb::Flush,
            "query" => Verb::Query,
            "hobbitdlog" => Verb::Log,
            "hobbitdxlog" => Verb::XLog,
            "hobbitdboard" => Verb::Board,
            "hobbitdxboard" => Verb::XBoard,
            "hostinfo" => Verb::HostInfo,
            "client" => Verb::Client,
            "clientlog" => Verb::ClientLog,
            "ghostlist" => Verb::GhostList,
            "ping" => Verb::Ping,
            "notify" => Verb::Notify,
            "schedule" => Verb::Schedule,
            "dummy" => Verb::Dummy,
            "channel" => Verb::Channel,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(verb)
    }
}

/// Split `host.test`; commas in the host part stand for dots
pub fn split_host_test(token: &str) -> ProtocolResult<(String, &str)> {
    let (host, test) = token
        .rsplit_once('.')
        .ok_or_else(|| ProtocolError::Malformed(format!("expected host.test, got '{token}'")))?;
    if host.is_empty() || test.is_empty() {
        return Err(ProtocolError::Malformed(format!("expected host.test, got '{token}'")));
    }
    Ok((host.replace(',', "."), test))
}

/// First line of a `status` or `summary` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusHeader<'a> {
    pub validity: Option<i64>,
    pub groups: Option<&'a str>,
    pub host: String,
    pub test: &'a str,
    pub color: Option<Color>,
}

pub fn parse_status_header(msg: &str) -> ProtocolResult<StatusHeader<'_>> {
    let (keyword, rest) = next_word(msg);
    let modifiers = keyword
        .strip_prefix("status")
        .or_else(|| keyword.strip_prefix("summary"))
        .unwrap_or("");

    let (duration, groups) = match modifiers.split_once("/group:") {
        Some((duration, groups)) => (duration, Some(groups).filter(|g| !g.is_empty())),
        None => (modifiers, None),
    };
    let validity = match duration.strip_prefix('+') {
        Some(d) => Some(
            duration_minutes(d)
                .ok_or_else(|| ProtocolError::Malformed(format!("bad duration '{d}'")))?,
        ),
        None => None,
    };

    let (target, rest) = next_word(rest);
    let (host, test) = split_host_test(target)?;
    let (color_word, _) = next_word(rest);
    Ok(StatusHeader {
        validity,
        groups,
        host,
        test,
        color: Color::parse_prefix(color_word),
    })
}

const RELAY_MARKER: &str = "\nStatus message received from ";

/// Take the relayed sender out of a status message
pub fn relayed_sender(msg: &str) -> (Cow<'_, str>, Option<String>) {
    let Some(start) = msg.find(RELAY_MARKER) else {
        return (Cow::Borrowed(msg), None);
    };
    let addr_start = start + RELAY_MARKER.len();
    let line_end = msg[addr_start..]
        .find('\n')
        .map_or(msg.len(), |i| addr_start + i);
    let sender = msg[addr_start..line_end].trim().to_string();
    let mut cleaned = String::with_capacity(msg.len());
    cleaned.push_str(&msg[..start]);
    if line_end < msg.len() {
        cleaned.push_str(&msg[line_end..]);
    }
    (Cow::Owned(cleaned), Some(sender).filter(|s| !s.is_empty()))
}

/// Sender announced by a proxy in a client report
pub fn client_proxy_ip(msg: &str) -> Option<String> {
    let section = &msg[msg.find("\n[proxy]\n")?..];
    let ip_start = section.find("\nClientIP:")? + "\nClientIP:".len();
    let rest = &section[ip_start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim().to_string()).filter(|ip| !ip.is_empty())
}

/// Split a batch at every `\n\n<keyword>`
///
/// The first block keeps whatever precedes the first separator.
pub fn split_blocks<'a>(msg: &'a str, keyword: &str) -> Vec<&'a str> {
    let separator = format!("\n\n{keyword}");
    let mut blocks = vec![];
    let mut start = 0;
    while let Some(pos) = msg[start..].find(&separator) {
        let end = start + pos;
        blocks.push(&msg[start..end]);
        start = end + 2;
    }
    blocks.push(&msg[start..]);
    blocks.into_iter().filter(|b| !b.trim().is_empty()).collect()
}

/// `name=value` options of board and log queries
pub fn query_options(rest: &str) -> Vec<(&str, &str)> {
    rest.split_whitespace()
        .filter_map(|word| word.split_once('='))
        .collect()
}
