//! Scheduled downtime windows
//!
//! A host's DOWNTIME attribute lists windows such as `W:0800:1700` or
//! `http,ftp:6:2200:0200:backup`. A red or yellow report inside an active
//! window is turned blue and carries the window's cause.

use chrono::{Datelike, Local, TimeZone, Timelike};

const DEFAULT_CAUSE: &str = "Planned downtime";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Window<'a> {
    tests: Option<Vec<&'a str>>,
    days: &'a str,
    start: u32,
    end: u32,
    cause: &'a str,
}

impl Window<'_> {
    fn applies_to(&self, test: &str) -> bool {
        match &self.tests {
            None => true,
            Some(tests) => tests.iter().any(|t| *t == "*" || *t == test),
        }
    }

    /// `weekday` is 0 for Sunday, `minute` counts from midnight
    fn active_at(&self, weekday: u32, minute: u32) -> bool {
        let day_ok = self.days.chars().any(|c| match c {
            '*' => true,
            'W' | 'w' => (1..=5).contains(&weekday),
            d => d.to_digit(10) == Some(weekday),
        });
        if !day_ok {
            return false;
        }
        if self.end > self.start {
            self.start <= minute && minute <= self.end
        } else {
            minute >= self.start || minute <= self.end
        }
    }
}

fn hhmm(text: &str) -> Option<u32> {
    let value: u32 = text.trim().parse().ok()?;
    let (hours, minutes) = (value / 100, value % 100);
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

fn parse_window(entry: &str) -> Option<Window<'_>> {
    let fields: Vec<&str> = entry.split(':').collect();
    match fields.as_slice() {
        [days, start, end] => Some(Window {
            tests: None,
            days,
            start: hhmm(start)?,
            end: hhmm(end)?,
            cause: DEFAULT_CAUSE,
        }),
        [tests, days, start, end, cause] => Some(Window {
            tests: Some(tests.split(',').map(str::trim).collect()),
            days,
            start: hhmm(start)?,
            end: hhmm(end)?,
            cause: if cause.is_empty() { DEFAULT_CAUSE } else { cause },
        }),
        _ => None,
    }
}

/// Split the specification into windows; service lists keep their commas
fn entries(spec: &str) -> Vec<&str> {
    let mut out = vec![];
    for chunk in spec.split(';') {
        // a comma only separates windows when the next piece starts a new
        // window, i.e. the current piece already has its colons
        let mut start = 0;
        let mut colons = 0;
        for (idx, c) in chunk.char_indices() {
            match c {
                ':' => colons += 1,
                ',' if colons >= 2 => {
                    out.push(&chunk[start..idx]);
                    start = idx + 1;
                    colons = 0;
                }
                _ => {}
            }
        }
        out.push(&chunk[start..]);
    }
    out.into_iter().map(str::trim).filter(|e| !e.is_empty()).collect()
}

/// Cause of the downtime window active for `test` at the given local time
pub fn active_cause(spec: &str, test: &str, weekday: u32, minute: u32) -> Option<String> {
    entries(spec)
        .into_iter()
        .filter_map(parse_window)
        .find(|window| window.applies_to(test) && window.active_at(weekday, minute))
        .map(|window| window.cause.to_string())
}

/// [`active_cause`] evaluated at the local time of `now`
pub fn active_cause_at(spec: &str, test: &str, now: i64) -> Option<String> {
    let local = Local.timestamp_opt(now, 0).single()?;
    let minute = local.hour() * 60 + local.minute();
    active_cause(spec, test, local.weekday().num_days_from_sunday(), minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tests_window() {
        // Wednesday 10:00
        assert_eq!(
            active_cause("W:0800:1700", "cpu", 3, 600),
            Some("Planned downtime".to_string())
        );
        // Sunday
        assert_eq!(active_cause("W:0800:1700", "cpu", 0, 600), None);
        // Wednesday 18:00
        assert_eq!(active_cause("W:0800:1700", "cpu", 3, 1080), None);
    }

    #[test]
    fn test_service_window_with_cause() {
        let spec = "http,ftp:6:2200:0200:backup run";
        assert_eq!(active_cause(spec, "http", 6, 23 * 60), Some("backup run".to_string()));
        assert_eq!(active_cause(spec, "ftp", 6, 60), Some("backup run".to_string()));
        assert_eq!(active_cause(spec, "cpu", 6, 23 * 60), None);
    }

    #[test]
    fn test_multiple_windows() {
        let spec = "0:0000:0600,*:1200:1230;disk:*:0300:0400:fsck";
        assert!(active_cause(spec, "cpu", 0, 100).is_some());
        assert!(active_cause(spec, "cpu", 4, 12 * 60 + 15).is_some());
        assert_eq!(active_cause(spec, "disk", 4, 200), Some("fsck".to_string()));
        assert_eq!(active_cause(spec, "cpu", 4, 200), None);
    }

    #[test]
    fn test_malformed_entries_are_ignored() {
        assert_eq!(active_cause("garbage", "cpu", 1, 0), None);
        assert_eq!(active_cause("*:2500:0100", "cpu", 1, 0), None);
    }
}
