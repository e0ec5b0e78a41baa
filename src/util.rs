use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::{Local, TimeZone};

const HOBBITD_PORT: &str = "HOBBITD_PORT";

const DEFAULT_PORT: u16 = 1984;

pub fn get_default_port() -> u16 {
    DEFAULT_PORT
}

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(HOBBITD_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const HOBBITD_ADDR: &str = "HOBBITD_ADDR";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));

pub fn get_addr() -> IpAddr {
    let addr_from_env = std::env::var(HOBBITD_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

pub fn get_default_listen() -> SocketAddr {
    SocketAddr::new(DEFAULT_ADDR, DEFAULT_PORT)
}

/// Listen address override from the environment, if either variable is set
pub fn get_listen_override() -> Option<SocketAddr> {
    if std::env::var(HOBBITD_PORT).is_err() && std::env::var(HOBBITD_ADDR).is_err() {
        return None;
    }
    Some(SocketAddr::new(get_addr(), get_port()))
}

const MACHINE: &str = "MACHINE";

pub fn get_machine_name() -> String {
    std::env::var(MACHINE).unwrap_or_else(|_| String::from("localhost"))
}

/// Enable time meaning "disabled until the next OK report"
pub const DISABLED_UNTIL_OK: i64 = -1;

/// Longest accepted duration, ten years
pub const MAX_DURATION_MINUTES: i64 = 10 * 365 * 1440;

/// Parse a duration such as `30`, `2h`, `1h30m` or `1w` into minutes
///
/// A bare number is minutes. Returns `None` when no digits are present or
/// the total exceeds [`MAX_DURATION_MINUTES`].
pub fn duration_minutes(text: &str) -> Option<i64> {
    let mut total: i64 = 0;
    let mut current: Option<i64> = None;

    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            current = Some(current.unwrap_or(0).checked_mul(10)?.checked_add(digit as i64)?);
            continue;
        }
        let factor = match c {
            'm' | 'M' => 1,
            'h' | 'H' => 60,
            'd' | 'D' => 1440,
            'w' | 'W' => 10080,
            _ => return None,
        };
        let value = current.take()?;
        total = total.checked_add(value.checked_mul(factor)?)?;
    }

    let total = match current {
        Some(value) => total.checked_add(value)?,
        None if text.is_empty() => return None,
        None => total,
    };
    (total <= MAX_DURATION_MINUTES).then_some(total)
}

/// Escape text so it fits in a single pipe-delimited field
pub fn nlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\p"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`nlencode`]; unknown escapes are kept as-is
pub fn nldecode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('p') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// The part of a message after its `host.test` token
///
/// Finds the first `.`, skips to the end of that word and then over the
/// following whitespace. Messages without a `.` have no data.
pub fn msg_data(msg: &str) -> Option<&str> {
    let dot = msg.find('.')?;
    let rest = &msg[dot..];
    let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    Some(rest[word_end..].trim_start())
}

pub fn first_line(text: &str) -> &str {
    text.split('\n').next().unwrap_or("")
}

/// Split off the first whitespace separated word
pub fn next_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    let end = text.find(char::is_whitespace).unwrap_or(text.len());
    (&text[..end], text[end..].trim_start())
}

/// `ctime`-like rendering of an epoch time, `N/A` for zero
pub fn timestr(epoch: i64) -> String {
    if epoch == 0 {
        return String::from("N/A");
    }
    match Local.timestamp_opt(epoch, 0).single() {
        Some(time) => time.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => String::from("N/A"),
    }
}
