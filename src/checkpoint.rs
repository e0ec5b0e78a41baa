//! Checkpoint persistence
//!
//! The whole store is written as pipe-delimited text lines so a restarted
//! daemon resumes with every color, timestamp, ack and pending task intact.
//!
//! ```text
//! @@HOBBITDCHK-V1|origin|host|test|sender|color|flags|oldcolor|logtime|lastchange|validtime|enabletime|acktime|cookie|cookieexpires|message|dismsg|ackmsg
//! @@HOBBITDCHK-V1|.acklist.|host|test|received|validuntil|cleartime|level|ackedby|msg|origin
//! @@HOBBITDCHK-V1|.task.|id|time|sender|command
//! ```
//!
//! Every text field is escaped with `nlencode`.
//!
//! The snapshot text is rendered without touching the store. Writing goes to
//! `PATH.<epoch>` first and is renamed into place.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::color::{Classification, Color, ColorPolicy};
use crate::registry::{HostRegistry, SUMMARY_HOST};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::store::{AckInfo, Cookie, HostKind, RecordKey, StatusStore};
use crate::util::{DISABLED_UNTIL_OK, nldecode, nlencode};

pub const HEADER: &str = "@@HOBBITDCHK-V1";

const LEGACY_HEADER: &str = "@@BBGENDCHK-V1";

const ACKLIST_TAG: &str = ".acklist.";

const TASK_TAG: &str = ".task.";

/// Fields a record line needs at minimum (the ack text may be missing)
const MIN_RECORD_FIELDS: usize = 17;

/// Render the snapshot of the store and the scheduler
pub fn render(store: &StatusStore, scheduler: &Scheduler, now: i64) -> String {
    let mut out = String::with_capacity(store.host_count() * 1024);

    for host in store.hosts() {
        for record in &host.records {
            let disabled = record.enabled_at == DISABLED_UNTIL_OK || record.enabled_at > now;
            let dismsg = record.dismsg.as_deref().filter(|_| disabled).unwrap_or("");
            let ackmsg = record
                .ackmsg
                .as_deref()
                .filter(|_| record.ack_until > now)
                .unwrap_or("");
            let _ = writeln!(
                out,
                "{HEADER}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
                nlencode(store.origin_name(record.origin)),
                nlencode(&host.name),
                nlencode(store.test_name(record.test)),
                nlencode(&record.sender),
                record.color,
                nlencode(&record.flags),
                record.old_color,
                record.log_time,
                record.last_change,
                record.valid_until,
                record.enabled_at,
                record.ack_until,
                record.cookie_id(),
                record.cookie_expires(),
                nlencode(&record.message),
                nlencode(dismsg),
                nlencode(ackmsg),
            );
        }
    }

    for host in store.hosts() {
        for record in &host.records {
            for ack in record.acks.iter().filter(|ack| !ack.is_expired(now)) {
                let _ = writeln!(
                    out,
                    "{HEADER}|{ACKLIST_TAG}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
                    nlencode(&host.name),
                    nlencode(store.test_name(record.test)),
                    ack.received,
                    ack.valid_until,
                    ack.clear_time,
                    ack.level,
                    nlencode(&ack.acked_by),
                    nlencode(&ack.message),
                    nlencode(store.origin_name(record.origin)),
                );
            }
        }
    }

    for task in scheduler.list() {
        let _ = writeln!(
            out,
            "{HEADER}|{TASK_TAG}|{}|{}|{}|{}",
            task.id,
            task.execution_time,
            nlencode(&task.sender),
            nlencode(&task.command)
        );
    }

    out
}

/// Write `contents` to `path` via a temporary file and a rename
pub fn write_atomic(path: &Path, contents: &str, now: i64) -> anyhow::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{now}"));
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write checkpoint {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| {
        format!("failed to rename {} to {}", tmp.display(), path.display())
    })?;
    debug!("checkpoint written to {}", path.display());
    Ok(())
}

/// What a load restored and skipped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub records: usize,
    pub acks: usize,
    pub tasks: usize,
    pub skipped: usize,
}

/// Collaborators a load consults
pub struct LoadContext<'a> {
    pub registry: &'a dyn HostRegistry,
    pub policy: ColorPolicy,
    /// Columns that are regenerated on the fly and never restored
    pub skip_tests: &'a [&'a str],
    pub now: i64,
}

fn parse_i64(field: &str) -> Option<i64> {
    field.trim().parse().ok()
}

/// Restore store and scheduler from checkpoint text
pub fn load(
    text: &str,
    store: &mut StatusStore,
    scheduler: &mut Scheduler,
    ctx: &LoadContext<'_>,
) -> LoadReport {
    let mut report = LoadReport::default();

    for line in text.lines().filter(|line| !line.is_empty()) {
        let fields: Vec<&str> = line.split('|').collect();
        if fields[0] != HEADER && fields[0] != LEGACY_HEADER {
            debug!("skipping checkpoint line with unknown header");
            report.skipped += 1;
            continue;
        }

        let restored = match fields.get(1).copied() {
            Some(TASK_TAG) => load_task(&fields, scheduler, ctx.now).map(|_| report.tasks += 1),
            Some(ACKLIST_TAG) => load_ack(&fields, store).map(|_| report.acks += 1),
            Some(tag) if tag.starts_with('.') => None,
            _ => load_record(&fields, store, ctx).map(|_| report.records += 1),
        };
        if restored.is_none() {
            report.skipped += 1;
        }
    }

    info!(
        "restored {} records, {} acks and {} tasks from checkpoint ({} lines skipped)",
        report.records, report.acks, report.tasks, report.skipped
    );
    report
}

fn load_task(fields: &[&str], scheduler: &mut Scheduler, now: i64) -> Option<()> {
    let [_, _, id, time, sender, command, ..] = fields else {
        return None;
    };
    let id: u32 = id.parse().ok()?;
    let time = parse_i64(time)?;
    if time <= now || sender.is_empty() || command.is_empty() {
        return None;
    }
    scheduler.restore(ScheduledTask {
        id,
        execution_time: time,
        sender: nldecode(sender),
        command: nldecode(command),
    });
    Some(())
}

fn load_ack(fields: &[&str], store: &mut StatusStore) -> Option<()> {
    let [_, _, host, test, received, valid_until, clear_time, level, acked_by, message, ..] =
        fields
    else {
        return None;
    };
    let test_id = store.tests.lookup(&nldecode(test))?;
    // older checkpoints carry no origin; those acks belong to the default one
    let origin = match fields.get(10) {
        Some(origin) => store.origins.lookup(&nldecode(origin))?,
        None => store.origins.default_origin(),
    };
    let record = store
        .host_mut(&nldecode(host))?
        .records
        .iter_mut()
        .find(|r| r.test == test_id && r.origin == origin)?;
    record.upsert_ack(AckInfo {
        level: level.parse().ok()?,
        received: parse_i64(received)?,
        valid_until: parse_i64(valid_until)?,
        clear_time: parse_i64(clear_time)?,
        acked_by: nldecode(acked_by),
        message: nldecode(message),
    });
    Some(())
}

fn load_record(fields: &[&str], store: &mut StatusStore, ctx: &LoadContext<'_>) -> Option<()> {
    if fields.len() < MIN_RECORD_FIELDS {
        warn!("checkpoint record with {} fields skipped", fields.len());
        return None;
    }
    let origin = nldecode(fields[1]);
    let (hostname, testname, sender) = (nldecode(fields[2]), nldecode(fields[3]), nldecode(fields[4]));
    let (hostname, testname) = (hostname.as_str(), testname.as_str());
    let message = nldecode(fields[15]);
    let color: Color = fields[5].parse().ok()?;
    if hostname.is_empty() || testname.is_empty() || message.is_empty() || color == Color::None {
        return None;
    }
    if ctx.skip_tests.contains(&testname) {
        return None;
    }

    let (ip, kind) = if hostname == SUMMARY_HOST {
        (String::new(), HostKind::Summary)
    } else {
        let Some(info) = ctx.registry.resolve(hostname) else {
            debug!("dropping checkpoint entry for unknown host {hostname}");
            return None;
        };
        (info.ip, HostKind::Normal)
    };

    store.find_or_create_host(hostname, &ip, kind);
    let test = store.find_or_create_test(testname);
    let origin = store.find_or_create_origin(&origin);
    let record = store.find_or_create_record(hostname, test, origin).ok()?;

    record.sender = sender;
    record.color = color;
    record.flags = nldecode(fields[6]);
    record.old_color = fields[7].parse().unwrap_or(Color::None);
    record.log_time = parse_i64(fields[8]).unwrap_or(0);
    record.last_change = parse_i64(fields[9]).unwrap_or(0);
    record.valid_until = parse_i64(fields[10]).unwrap_or(0);
    record.enabled_at = parse_i64(fields[11]).unwrap_or(0);
    record.ack_until = parse_i64(fields[12]).unwrap_or(0);
    let cookie: i32 = fields[13].parse().unwrap_or(-1);
    let cookie_expires = parse_i64(fields[14]).unwrap_or(0);
    record.message = message;
    record.dismsg = Some(nldecode(fields[16])).filter(|m| !m.is_empty());
    record.ackmsg = fields
        .get(17)
        .map(|m| nldecode(m))
        .filter(|m| !m.is_empty());

    if record.ack_until > record.valid_until {
        record.valid_until = record.ack_until;
    }
    if record.enabled_at == DISABLED_UNTIL_OK {
        record.valid_until = i64::MAX;
    } else if record.enabled_at > record.valid_until {
        record.valid_until = record.enabled_at;
    }
    record.active_alert = ctx.policy.classify(color) == Classification::Alert;
    record.history_synced = false;

    if cookie > 0 {
        record.cookie = Some(Cookie {
            id: cookie,
            expires: cookie_expires,
        });
        store.cookies.register(
            cookie,
            RecordKey {
                host: hostname.to_string(),
                test,
                origin,
            },
        );
    }
    Some(())
}
