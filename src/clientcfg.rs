//! Client-local configuration served in reply to `client` reports
//!
//! The file consists of sections introduced by a header line:
//!
//! ```text
//! [host=^www]      hostname regex
//! [class=linux]    class regex
//! [os=%sun.*]      OS regex (a leading % is accepted and ignored)
//! [web*]           hostname prefix
//! [db1]            exact name, matched against host, class and OS
//! ```
//!
//! The first matching host section wins, then the first class section, then
//! the first OS section.

use std::path::Path;

use regex::Regex;
use tracing::warn;

#[derive(Debug)]
enum Selector {
    Host(Regex),
    Class(Regex),
    Os(Regex),
    Any(Regex),
}

#[derive(Debug)]
struct Section {
    selector: Selector,
    body: String,
}

/// Parsed client-local configuration
#[derive(Debug, Default)]
pub struct ClientConfig {
    sections: Vec<Section>,
}

fn pattern(text: &str) -> Option<Regex> {
    let text = text.strip_prefix('%').unwrap_or(text);
    let text = if text == "*" { "." } else { text };
    match Regex::new(text) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("invalid client-local pattern '{text}': {e}");
            None
        }
    }
}

fn selector(header: &str) -> Option<Selector> {
    if let Some(re) = header.strip_prefix("host=") {
        return pattern(re).map(Selector::Host);
    }
    if let Some(re) = header.strip_prefix("class=") {
        return pattern(re).map(Selector::Class);
    }
    if let Some(re) = header.strip_prefix("os=") {
        return pattern(re).map(Selector::Os);
    }
    if let Some(prefix) = header.strip_suffix('*') {
        return pattern(&format!("^{}", regex::escape(prefix))).map(Selector::Host);
    }
    pattern(&format!("^{}$", regex::escape(header))).map(Selector::Any)
}

impl ClientConfig {
    pub fn parse(text: &str) -> Self {
        let mut sections: Vec<Section> = vec![];
        let mut current: Option<Section> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
                sections.extend(current.take());
                current = selector(header).map(|selector| Section {
                    selector,
                    body: String::new(),
                });
                continue;
            }
            if let Some(section) = current.as_mut() {
                section.body.push_str(line);
                section.body.push('\n');
            }
        }
        sections.extend(current.take());

        Self { sections }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    /// Configuration text for a host, if any section matches
    pub fn lookup(&self, host: &str, os: &str, class: &str) -> Option<&str> {
        let host_match = self.sections.iter().find(|s| match &s.selector {
            Selector::Host(re) | Selector::Any(re) => re.is_match(host),
            _ => false,
        });
        let class_match = || {
            self.sections.iter().find(|s| match &s.selector {
                Selector::Class(re) | Selector::Any(re) => re.is_match(class),
                _ => false,
            })
        };
        let os_match = || {
            self.sections.iter().find(|s| match &s.selector {
                Selector::Os(re) | Selector::Any(re) => re.is_match(os),
                _ => false,
            })
        };

        host_match
            .or_else(class_match)
            .or_else(os_match)
            .map(|s| s.body.as_str())
    }
}
