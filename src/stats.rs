//! Daemon self-statistics
//!
//! Counts requests per command and builds the periodic self-status report
//! the daemon feeds back into itself.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write;

use chrono::{Local, TimeZone};

use crate::channels::ChannelStats;
use crate::color::Color;
use crate::store::ghosts::GhostEntry;

/// Retained error messages
const MAX_ERRORS: usize = 20;

/// Buckets listed in the report, in order
const COMMANDS: [&str; 22] = [
    "status", "combo", "page", "summary", "data", "client", "notes", "enable", "disable", "ack",
    "config", "query", "hobbitdboard", "hobbitdlog", "drop", "rename", "dummy", "ping", "notify",
    "schedule", "download", "other",
];

#[derive(Debug)]
pub struct Statistics {
    started: i64,
    counts: BTreeMap<&'static str, u64>,
    total: u64,
    bogus: u64,
    last_report: i64,
    total_at_last_report: u64,
    errors: VecDeque<String>,
}

impl Statistics {
    pub fn new(now: i64) -> Self {
        Self {
            started: now,
            counts: BTreeMap::new(),
            total: 0,
            bogus: 0,
            last_report: now,
            total_at_last_report: 0,
            errors: VecDeque::new(),
        }
    }

    /// Count one request under its command keyword
    pub fn count(&mut self, command: &str) {
        self.total += 1;
        let bucket = COMMANDS
            .iter()
            .find(|name| **name == command)
            .copied()
            .unwrap_or("other");
        *self.counts.entry(bucket).or_insert(0) += 1;
    }

    /// Count a status applied as part of a combo
    pub fn count_combo_part(&mut self) {
        *self.counts.entry("status").or_insert(0) += 1;
    }

    pub fn count_bogus(&mut self) {
        self.bogus += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn bogus(&self) -> u64 {
        self.bogus
    }

    pub fn command_count(&self, command: &str) -> u64 {
        self.counts.get(command).copied().unwrap_or(0)
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.errors.len() == MAX_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(message.into());
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    /// Build the self-status message and reset the rate window and error list
    pub fn report<'a>(
        &mut self,
        machine: &str,
        now: i64,
        channels: &[ChannelStats],
        ghosts: impl Iterator<Item = (&'a str, &'a GhostEntry)>,
    ) -> String {
        let color = if self.errors.is_empty() {
            Color::Green
        } else {
            Color::Yellow
        };

        let uptime = (now - self.started).max(0);
        let started = Local
            .timestamp_opt(self.started, 0)
            .single()
            .map(|t| t.format("%d-%b-%Y %T").to_string())
            .unwrap_or_default();

        let mut out = String::new();
        let _ = writeln!(out, "status {machine}.hobbitd {color}");
        let _ = writeln!(out, "Statistics for Hobbit daemon");
        let _ = writeln!(
            out,
            "Up since {started} ({} days, {:02}:{:02}:{:02})\n",
            uptime / 86400,
            (uptime % 86400) / 3600,
            (uptime % 3600) / 60,
            uptime % 60
        );
        let _ = writeln!(out, "Incoming messages      : {:>10}", self.total);
        for name in COMMANDS {
            let _ = writeln!(out, "- {:<20} : {:>10}", name, self.command_count(name));
        }
        let _ = writeln!(out, "- {:<20} : {:>10}", "Bogus/Timeouts", self.bogus);

        let window = (now - self.last_report).max(1);
        let rate = (self.total - self.total_at_last_report) / window as u64;
        let _ = writeln!(
            out,
            "Incoming messages/sec  : {:>10} (average last {} seconds)\n",
            rate, window
        );
        self.last_report = now;
        self.total_at_last_report = self.total;

        for channel in channels {
            let _ = writeln!(
                out,
                "{:<7}channel messages: {:>10} ({} readers)",
                channel.kind.name(),
                channel.messages,
                channel.readers
            );
        }

        let mut ghost_lines = String::new();
        for (name, entry) in ghosts {
            let _ = writeln!(ghost_lines, "  {:<15} reported host {}", entry.sender, name);
        }
        if !ghost_lines.is_empty() {
            let _ = write!(out, "\n\nGhost reports:\n{ghost_lines}");
        }

        if !self.errors.is_empty() {
            out.push_str("\n\nLatest errormessages:\n");
            for error in self.errors.drain(..) {
                out.push_str(&error);
                out.push('\n');
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelKind;

    #[test]
    fn test_counts_and_buckets() {
        let mut stats = Statistics::new(0);
        stats.count("status");
        stats.count("status");
        stats.count("hostinfo");
        stats.count_bogus();
        assert_eq!(stats.total(), 3);
        assert_eq!(stats.command_count("status"), 2);
        assert_eq!(stats.command_count("other"), 1);
        assert_eq!(stats.bogus(), 1);
    }

    #[test]
    fn test_report_goes_yellow_with_errors() {
        let mut stats = Statistics::new(0);
        stats.count("status");
        stats.record_error("checkpoint write failed");
        let channels = vec![ChannelStats {
            kind: ChannelKind::Status,
            messages: 7,
            readers: 2,
        }];
        let ghost = GhostEntry {
            sender: "10.0.0.9".to_string(),
            seen: 100,
        };

        let report = stats.report("hub", 300, &channels, std::iter::once(("ghost1", &ghost)));
        assert!(report.starts_with("status hub.hobbitd yellow\nStatistics for Hobbit daemon\n"));
        assert!(report.contains("- status               :          1"));
        assert!(report.contains("status channel messages:          7 (2 readers)"));
        assert!(report.contains("  10.0.0.9        reported host ghost1"));
        assert!(report.contains("Latest errormessages:\ncheckpoint write failed"));

        let second = stats.report("hub", 600, &channels, std::iter::empty());
        assert!(second.starts_with("status hub.hobbitd green"));
    }

    #[test]
    fn test_error_buffer_is_bounded() {
        let mut stats = Statistics::new(0);
        for i in 0..30 {
            stats.record_error(format!("error {i}"));
        }
        assert_eq!(stats.errors().count(), MAX_ERRORS);
        assert_eq!(stats.errors().next(), Some("error 10"));
    }
}
