//! Alert, acknowledgement and disable state machine
//!
//! [`apply_status`] is the only code path that changes the color of a
//! [`StatusRecord`]. It is pure apart from the cookie jar: the caller owns the
//! record, supplies the clock and turns the returned events into channel
//! posts.
//!
//! ```text
//! report ─► classify ─► disable ─► ack ─► validity ─► message/flags ─► cookie ─► events
//!                         │                                                         │
//!                         └──────────────── EnableDisable ◄─────────────────────────┘
//! ```

use tracing::trace;

use crate::color::{Classification, Color, ColorPolicy};
use crate::store::cookies::COOKIE_LIFETIME;
use crate::store::record::{Cookie, StatusRecord};
use crate::util::{DISABLED_UNTIL_OK, msg_data};

/// Ack entries of a recovered record are kept this long
pub const ACK_CLEAR_DELAY: i64 = 720;

/// Default validity of a report in minutes
pub const DEFAULT_VALIDITY: i64 = 30;

/// Source of fresh, globally unique cookies
pub trait CookieJar {
    fn issue(&mut self) -> i32;
    fn revoke(&mut self, id: i32);
}

/// One incoming status report, after parsing and authorization
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub color: Color,
    /// New message body; `None` re-applies the stored one
    pub message: Option<&'a str>,
    pub sender: &'a str,
    pub groups: Option<&'a str>,
    /// Cause of an active scheduled downtime
    pub downtime: Option<&'a str>,
    pub validity_minutes: i64,
}

/// Facts about the record's surroundings the caller looks up
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub now: i64,
    pub policy: ColorPolicy,
    pub summary: bool,
    /// The host has a client report no event has carried yet
    pub client_pending: bool,
    /// Client reports for this test are persisted downstream
    pub client_save: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReason {
    Alert,
    Recovery,
    ColorChange,
}

/// Something the caller must broadcast, in emission order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    EnableDisable,
    /// Carries `last_change` as it was before this report
    StatusChange { previous_change: i64 },
    ClientChange,
    Page(PageReason),
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejected {
    EmptyMessage,
    NoColor,
}

impl std::fmt::Display for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejected::EmptyMessage => write!(f, "empty status message"),
            Rejected::NoColor => write!(f, "status without a color"),
        }
    }
}

/// Flags annotation directly after the color word
pub fn extract_flags(message: &str) -> String {
    let Some(data) = msg_data(message) else {
        return String::new();
    };
    let word_end = data.find(char::is_whitespace).unwrap_or(data.len());
    data[word_end..]
        .strip_prefix(" <!-- [flags:")
        .and_then(|rest| rest.split_once(']'))
        .map(|(flags, _)| flags.to_string())
        .unwrap_or_default()
}

fn is_ok(policy: &ColorPolicy, color: Color) -> bool {
    policy.classify(color) == Classification::Ok
}

pub fn apply_status(
    record: &mut StatusRecord,
    report: &Report<'_>,
    ctx: &Context,
    jar: &mut impl CookieJar,
) -> Result<Vec<StatusEvent>, Rejected> {
    if report.message.is_some_and(str::is_empty) {
        return Err(Rejected::EmptyMessage);
    }
    if report.color == Color::None {
        return Err(Rejected::NoColor);
    }

    let now = ctx.now;
    let mut events = vec![];
    let mut color = report.color;

    // disable handling
    if record.enabled_at == DISABLED_UNTIL_OK {
        if is_ok(&ctx.policy, color) && color != Color::DISABLED {
            record.enabled_at = 0;
            record.dismsg = None;
            events.push(StatusEvent::EnableDisable);
        } else {
            color = Color::DISABLED;
        }
    } else if record.enabled_at > now {
        color = Color::DISABLED;
    } else if record.enabled_at > 0 {
        record.enabled_at = 0;
        record.dismsg = None;
        events.push(StatusEvent::EnableDisable);
    } else {
        record.dismsg = match report.downtime {
            Some(cause) if color == Color::DISABLED => Some(cause.to_string()),
            _ => None,
        };
    }
    record.downtime_active = report.downtime.is_some();

    let class = ctx.policy.classify(color);
    let was_ok = is_ok(&ctx.policy, record.color);

    // acknowledgement handling
    if record.ack_until != 0 && (class == Classification::Ok || record.ack_until <= now) {
        record.ack_until = 0;
        record.ackmsg = None;
    }

    record.log_time = now;
    record.valid_until = now.saturating_add(report.validity_minutes.saturating_mul(60));
    if record.ack_until > record.valid_until {
        record.valid_until = record.ack_until;
    }
    if record.enabled_at == DISABLED_UNTIL_OK {
        record.valid_until = i64::MAX;
    } else if record.enabled_at > record.valid_until {
        record.valid_until = record.enabled_at;
    }

    record.sender = report.sender.to_string();
    record.old_color = record.color;
    record.color = color;
    record.groups = report.groups.map(str::to_string);

    if record.old_color != Color::None && !was_ok && class == Classification::Ok {
        for ack in &mut record.acks {
            ack.clear_time = now + ACK_CLEAR_DELAY;
        }
    } else if was_ok && class != Classification::Ok {
        for ack in &mut record.acks {
            ack.clear_time = ack.valid_until;
        }
    }

    if let Some(message) = report.message {
        record.message.clear();
        record.message.push_str(message);
        record.flags = extract_flags(message);
    }

    // cookie maintenance
    if class == Classification::Alert {
        if record.cookie.is_none_or(|c| c.expires < now) {
            if let Some(old) = record.cookie.take() {
                jar.revoke(old.id);
            }
            let id = jar.issue();
            trace!("issued cookie {id}");
            record.cookie = Some(Cookie {
                id,
                expires: now + COOKIE_LIFETIME,
            });
        }
    } else if let Some(old) = record.cookie.take() {
        jar.revoke(old.id);
    }

    let color_changed = record.old_color != record.color;
    if !ctx.summary && (!record.history_synced || color_changed) {
        events.push(StatusEvent::StatusChange {
            previous_change: record.last_change,
        });
    }
    record.history_synced = true;

    if color_changed && !record.downtime_active {
        if !ctx.summary
            && ctx.client_pending
            && class == Classification::Alert
            && ctx.client_save
        {
            events.push(StatusEvent::ClientChange);
        }
        record.last_change = now;
    }

    if !ctx.summary {
        match class {
            Classification::Alert if !record.active_alert => {
                record.active_alert = true;
                events.push(StatusEvent::Page(PageReason::Alert));
            }
            Classification::Ok if record.active_alert => {
                record.active_alert = false;
                events.push(StatusEvent::Page(PageReason::Recovery));
            }
            _ if record.active_alert && color_changed => {
                events.push(StatusEvent::Page(PageReason::ColorChange));
            }
            _ => {}
        }
    }

    events.push(StatusEvent::Status);
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::intern::{OriginTable, TestTable};
    use crate::store::record::AckInfo;

    #[derive(Default)]
    struct Jar {
        next: i32,
        revoked: Vec<i32>,
    }

    impl CookieJar for Jar {
        fn issue(&mut self) -> i32 {
            self.next += 1;
            self.next
        }

        fn revoke(&mut self, id: i32) {
            self.revoked.push(id);
        }
    }

    fn record() -> StatusRecord {
        let mut tests = TestTable::new(false);
        StatusRecord::new(tests.intern("cpu"), OriginTable::default().default_origin())
    }

    fn ctx(now: i64) -> Context {
        Context {
            now,
            policy: ColorPolicy::default(),
            summary: false,
            client_pending: false,
            client_save: false,
        }
    }

    fn report(color: Color, message: &str) -> Report<'_> {
        Report {
            color,
            message: Some(message),
            sender: "10.0.0.1",
            groups: None,
            downtime: None,
            validity_minutes: DEFAULT_VALIDITY,
        }
    }

    #[test]
    fn test_first_green_report() {
        let mut r = record();
        let mut jar = Jar::default();
        let events = apply_status(&mut r, &report(Color::Green, "status h.cpu green ok"), &ctx(1000), &mut jar).unwrap();

        assert_eq!(
            events,
            vec![StatusEvent::StatusChange { previous_change: 0 }, StatusEvent::Status]
        );
        assert_eq!(r.color, Color::Green);
        assert_eq!(r.last_change, 1000);
        assert_eq!(r.valid_until, 1000 + 1800);
        assert!(r.cookie.is_none());
    }

    #[test]
    fn test_red_pages_once_and_issues_cookie() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Green, "status h.cpu green ok"), &ctx(1000), &mut jar).unwrap();
        let events = apply_status(&mut r, &report(Color::Red, "status h.cpu red bad"), &ctx(2000), &mut jar).unwrap();

        assert!(events.contains(&StatusEvent::Page(PageReason::Alert)));
        assert!(events.contains(&StatusEvent::StatusChange { previous_change: 1000 }));
        assert!(r.active_alert);
        assert_eq!(r.cookie, Some(Cookie { id: 1, expires: 2000 + COOKIE_LIFETIME }));

        let again = apply_status(&mut r, &report(Color::Red, "status h.cpu red bad"), &ctx(2000), &mut jar).unwrap();
        assert_eq!(again, vec![StatusEvent::Status]);
        assert_eq!(r.cookie.map(|c| c.id), Some(1));
    }

    #[test]
    fn test_color_change_while_alerting() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Yellow, "status h.cpu yellow"), &ctx(1000), &mut jar).unwrap();
        let events = apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1100), &mut jar).unwrap();
        assert!(events.contains(&StatusEvent::Page(PageReason::ColorChange)));
    }

    #[test]
    fn test_recovery_clears_cookie_and_pages() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1000), &mut jar).unwrap();
        let events = apply_status(&mut r, &report(Color::Green, "status h.cpu green"), &ctx(1100), &mut jar).unwrap();

        assert!(events.contains(&StatusEvent::Page(PageReason::Recovery)));
        assert!(!r.active_alert);
        assert!(r.cookie.is_none());
        assert_eq!(jar.revoked, vec![1]);
    }

    #[test]
    fn test_timed_disable_forces_blue_then_expires() {
        let mut r = record();
        let mut jar = Jar::default();
        r.enabled_at = 1000 + 1800;
        r.dismsg = Some("testing".to_string());

        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1000), &mut jar).unwrap();
        assert_eq!(r.color, Color::Blue);
        assert_eq!(r.valid_until, 1000 + 1800);
        assert!(r.cookie.is_none());

        let events = apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(3000), &mut jar).unwrap();
        assert_eq!(events[0], StatusEvent::EnableDisable);
        assert_eq!(r.color, Color::Red);
        assert_eq!(r.enabled_at, 0);
        assert!(r.dismsg.is_none());
    }

    #[test]
    fn test_disable_until_ok() {
        let mut r = record();
        let mut jar = Jar::default();
        r.enabled_at = DISABLED_UNTIL_OK;

        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1000), &mut jar).unwrap();
        assert_eq!(r.color, Color::Blue);
        assert_eq!(r.valid_until, i64::MAX);

        let events = apply_status(&mut r, &report(Color::Green, "status h.cpu green"), &ctx(1100), &mut jar).unwrap();
        assert_eq!(events[0], StatusEvent::EnableDisable);
        assert_eq!(r.enabled_at, 0);
        assert_eq!(r.color, Color::Green);
    }

    #[test]
    fn test_downtime_is_silent_and_keeps_last_change() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Green, "status h.cpu green"), &ctx(1000), &mut jar).unwrap();

        let mut masked = report(Color::Blue, "status h.cpu red");
        masked.downtime = Some("Planned downtime");
        let events = apply_status(&mut r, &masked, &ctx(2000), &mut jar).unwrap();

        assert!(!events.contains(&StatusEvent::EnableDisable));
        assert_eq!(r.dismsg.as_deref(), Some("Planned downtime"));
        assert!(r.downtime_active);
        assert_eq!(r.last_change, 1000);
    }

    #[test]
    fn test_ack_cleared_on_ok() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1000), &mut jar).unwrap();
        r.ack_until = 1000 + 3600;
        r.ackmsg = Some("on it".to_string());

        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1100), &mut jar).unwrap();
        assert_eq!(r.valid_until, 1000 + 3600);

        apply_status(&mut r, &report(Color::Green, "status h.cpu green"), &ctx(1200), &mut jar).unwrap();
        assert_eq!(r.ack_until, 0);
        assert!(r.ackmsg.is_none());
    }

    #[test]
    fn test_ackinfo_clear_time_follows_recovery() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(1000), &mut jar).unwrap();
        r.acks.push(AckInfo {
            level: 1,
            received: 1000,
            valid_until: 9000,
            clear_time: 9000,
            acked_by: "ops".to_string(),
            message: "known".to_string(),
        });

        apply_status(&mut r, &report(Color::Green, "status h.cpu green"), &ctx(2000), &mut jar).unwrap();
        assert_eq!(r.acks[0].clear_time, 2000 + ACK_CLEAR_DELAY);

        apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &ctx(2100), &mut jar).unwrap();
        assert_eq!(r.acks[0].clear_time, 9000);
    }

    #[test]
    fn test_client_change_needs_pending_report_and_save_flag() {
        let mut r = record();
        let mut jar = Jar::default();
        let mut context = ctx(1000);
        context.client_pending = true;
        let events = apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &context, &mut jar).unwrap();
        assert!(!events.contains(&StatusEvent::ClientChange));

        let mut r = record();
        context.client_save = true;
        let events = apply_status(&mut r, &report(Color::Red, "status h.cpu red"), &context, &mut jar).unwrap();
        assert!(events.contains(&StatusEvent::ClientChange));
    }

    #[test]
    fn test_summary_only_emits_status() {
        let mut r = record();
        let mut jar = Jar::default();
        let mut context = ctx(1000);
        context.summary = true;
        let events = apply_status(&mut r, &report(Color::Red, "summary summary.a.b red"), &context, &mut jar).unwrap();
        assert_eq!(events, vec![StatusEvent::Status]);
    }

    #[test]
    fn test_rejects_empty_message() {
        let mut r = record();
        let mut jar = Jar::default();
        assert_eq!(
            apply_status(&mut r, &report(Color::Red, ""), &ctx(1000), &mut jar),
            Err(Rejected::EmptyMessage)
        );
        assert_eq!(r.color, Color::None);
    }

    #[test]
    fn test_extract_flags() {
        assert_eq!(extract_flags("status h.cpu red <!-- [flags:OadR] --> load high"), "OadR");
        assert_eq!(extract_flags("status h.cpu red load high"), "");
        assert_eq!(extract_flags("status h"), "");
    }

    #[test]
    fn test_reapply_keeps_message() {
        let mut r = record();
        let mut jar = Jar::default();
        apply_status(&mut r, &report(Color::Green, "status h.cpu green <!-- [flags:x] -->"), &ctx(1000), &mut jar).unwrap();
        let mut sweep = report(Color::Purple, "");
        sweep.message = None;
        apply_status(&mut r, &sweep, &ctx(5000), &mut jar).unwrap();
        assert_eq!(r.message, "status h.cpu green <!-- [flags:x] -->");
        assert_eq!(r.flags, "x");
        assert_eq!(r.color, Color::Purple);
    }
}
