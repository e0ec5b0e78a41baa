//! End-to-end behaviour of the dispatcher and the alert state machine
//!
//! Each test drives a daemon directly through `dispatch` and watches what
//! comes out of the broadcast channels.

use hobbitd::color::Color;
use hobbitd::protocol::Reply;
use pretty_assertions::assert_eq;

use super::helpers::*;

#[tokio::test]
async fn test_first_report_creates_record() {
    let mut daemon = daemon();
    let recorder = Recorder::all(&daemon.channels);

    let reply = daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    settle().await;

    assert_eq!(reply, Reply::None);
    let host = daemon.store.host("host1").unwrap();
    assert_eq!(host.records.len(), 1);

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Green);
    assert!(!record.active_alert);
    assert!(record.cookie.is_none());

    assert_eq!(recorder.count("stachg"), 1);
    assert_eq!(recorder.count("status"), 1);
    assert_eq!(recorder.count("page"), 0);
}

#[tokio::test]
async fn test_alert_issues_cookie_and_pages() {
    let mut daemon = daemon();
    let recorder = Recorder::all(&daemon.channels);

    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    settle().await;
    recorder.clear();

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW + 60).await;
    settle().await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Red);
    assert_eq!(record.old_color, Color::Green);
    assert_eq!(record.last_change, NOW + 60);
    assert!(record.active_alert);

    let cookie = record.cookie.expect("alert records carry a cookie");
    assert!(cookie.id > 0);
    assert!(daemon.store.find_by_cookie(cookie.id, NOW + 60).is_some());

    assert_eq!(recorder.count("page"), 1);
    assert_eq!(recorder.count("stachg"), 1);
    assert_eq!(recorder.count("status"), 1);
}

#[tokio::test]
async fn test_recovery_revokes_cookie_and_pages() {
    let mut daemon = daemon();
    let recorder = Recorder::all(&daemon.channels);

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;
    let cookie = daemon
        .store
        .find_record("host1", "test1", "")
        .and_then(|r| r.cookie)
        .unwrap();
    settle().await;
    recorder.clear();

    daemon.dispatch("status host1.test1 green\nok again", peer(), "", NOW + 60).await;
    settle().await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert!(!record.active_alert);
    assert!(record.cookie.is_none());
    assert!(daemon.store.find_by_cookie(cookie.id, NOW + 60).is_none());
    assert_eq!(recorder.count("page"), 1);
}

#[tokio::test]
async fn test_disable_forces_blue_until_expiry() {
    let mut daemon = daemon();
    let recorder = Recorder::all(&daemon.channels);

    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    daemon.dispatch("disable host1.test1 30 testing", peer(), "", NOW).await;
    settle().await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.enabled_at, NOW + 1800);
    assert_eq!(record.color, Color::Blue);
    assert_eq!(record.dismsg.as_deref(), Some("testing"));
    assert!(recorder.count("enadis") >= 1);

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW + 600).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Blue);
    assert!(record.cookie.is_none());

    settle().await;
    recorder.clear();
    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW + 1801).await;
    settle().await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Red);
    assert_eq!(record.enabled_at, 0);
    assert!(record.dismsg.is_none());
    assert_eq!(recorder.count("enadis"), 1);
}

#[tokio::test]
async fn test_enable_lifts_disable() {
    let mut daemon = daemon();

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;
    daemon.dispatch("disable host1.test1 30 testing", peer(), "", NOW).await;
    daemon.dispatch("enable host1.test1", peer(), "", NOW + 60).await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.enabled_at, 0);
    assert_eq!(record.color, Color::Red);

    daemon.dispatch("status host1.test1 red\nstill failing", peer(), "", NOW + 120).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Red);
}

#[tokio::test]
async fn test_disable_until_ok() {
    let mut daemon = daemon();

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;
    daemon.dispatch("disable host1.test1 -1 until fixed", peer(), "", NOW).await;

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW + 86_400).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Blue);

    daemon.dispatch("status host1.test1 green\nfixed", peer(), "", NOW + 90_000).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Green);
    assert_eq!(record.enabled_at, 0);
}

#[tokio::test]
async fn test_ack_extends_validity() {
    let mut daemon = daemon();
    let recorder = Recorder::all(&daemon.channels);

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;
    let cookie = daemon
        .store
        .find_record("host1", "test1", "")
        .and_then(|r| r.cookie)
        .unwrap();
    settle().await;
    recorder.clear();

    daemon
        .dispatch(&format!("ack {} 60 ack text", cookie.id), peer(), "", NOW)
        .await;
    settle().await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.ack_until, NOW + 3600);
    assert!(record.valid_until >= record.ack_until);
    assert_eq!(record.ackmsg.as_deref(), Some("ack text"));
    assert_eq!(recorder.count("ack"), 1);

    // a new red report keeps the ack
    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW + 60).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.ack_until, NOW + 3600);
    assert!(record.valid_until >= NOW + 3600);
}

#[tokio::test]
async fn test_ack_accepts_legacy_forms() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.cpu red\nload", peer(), "", NOW).await;
    daemon.dispatch("status host1.disk red\nfull", peer(), "", NOW).await;
    let cookie = |daemon: &hobbitd::daemon::Daemon, test: &str| {
        daemon.store.find_record("host1", test, "").and_then(|r| r.cookie).unwrap().id
    };

    let cpu = cookie(&daemon, "cpu");
    daemon.dispatch(&format!("hobbitdack {cpu} 30 cpu"), peer(), "", NOW).await;
    let disk = cookie(&daemon, "disk");
    daemon.dispatch(&format!("ack ack_event {disk} 2h disk"), peer(), "", NOW).await;

    assert_eq!(daemon.store.find_record("host1", "cpu", "").unwrap().ack_until, NOW + 1800);
    assert_eq!(daemon.store.find_record("host1", "disk", "").unwrap().ack_until, NOW + 7200);
    assert_eq!(daemon.stats.bogus(), 0);
}

#[tokio::test]
async fn test_out_of_range_durations_are_rejected() {
    let mut daemon = daemon();
    let huge = "99999999999999999999";

    daemon
        .dispatch(&format!("status+{huge} host1.test1 green\nok"), peer(), "", NOW)
        .await;
    assert!(daemon.store.find_record("host1", "test1", "").is_none());

    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;
    daemon
        .dispatch(&format!("disable host1.test1 {huge} forever"), peer(), "", NOW)
        .await;
    let cookie = daemon
        .store
        .find_record("host1", "test1", "")
        .and_then(|r| r.cookie)
        .unwrap();
    daemon
        .dispatch(&format!("ack {} {huge} later", cookie.id), peer(), "", NOW)
        .await;
    daemon
        .dispatch(&format!("ackinfo host1.test1\n1\n{}\nop\nmsg", i64::MAX), peer(), "", NOW)
        .await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Red);
    assert_eq!(record.enabled_at, 0);
    assert_eq!(record.ack_until, 0);
    assert!(record.acks.is_empty());
    assert!(record.valid_until > NOW);
    assert_eq!(daemon.stats.bogus(), 4);
}

#[tokio::test]
async fn test_ack_with_unknown_cookie_is_bogus() {
    let mut daemon = daemon();
    daemon.dispatch("hobbitdack 4711 60 nothing to ack", peer(), "", NOW).await;
    assert_eq!(daemon.stats.bogus(), 1);
}

#[tokio::test]
async fn test_stale_records_go_purple_or_clear() {
    let mut daemon = daemon();

    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    daemon.dispatch("status host2.cpu green\nok", peer(), "", NOW).await;
    daemon.dispatch("status+1d host2.conn red\nhost unreachable", peer(), "", NOW).await;

    assert!(daemon.tick(NOW + 2000).await.is_none());

    let stale = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(stale.color, Color::Purple);
    assert_eq!(stale.sender, "hobbitd");

    let unreachable = daemon.store.find_record("host2", "cpu", "").unwrap();
    assert_eq!(unreachable.color, Color::Clear);

    let conn = daemon.store.find_record("host2", "conn", "").unwrap();
    assert_eq!(conn.color, Color::Red);
}

#[tokio::test]
async fn test_stale_sweep_can_be_disabled() {
    let mut daemon = daemon_with(hobbitd::config::Config {
        purple_checks: false,
        ..test_config()
    });
    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    daemon.tick(NOW + 2000).await;

    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Green);
}

#[tokio::test]
async fn test_drop_test_keeps_other_tests() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;
    daemon.dispatch("status host1.test2 green\nok", peer(), "", NOW).await;

    let recorder = Recorder::all(&daemon.channels);
    daemon.dispatch("drop host1 test1", peer(), "", NOW).await;
    settle().await;

    assert!(daemon.store.find_record("host1", "test1", "").is_none());
    assert!(daemon.store.find_record("host1", "test2", "").is_some());

    assert_eq!(recorder.count("droptest"), 7);
    let message = &recorder.with_marker("droptest")[0];
    assert!(message.contains("/*|"));
    assert!(message.ends_with("|host1|test1\n@@\n"));
}

#[tokio::test]
async fn test_drop_host_removes_everything() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.test1 red\nfail", peer(), "", NOW).await;

    daemon.dispatch("drop host1", peer(), "", NOW).await;
    assert!(daemon.store.host("host1").is_none());
    assert!(daemon.store.cookies.is_empty());
}

#[tokio::test]
async fn test_rename_test_moves_record() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.disk yellow\n90% full", peer(), "", NOW).await;

    daemon.dispatch("rename host1 disk fs", peer(), "", NOW).await;

    assert!(daemon.store.find_record("host1", "disk", "").is_none());
    let record = daemon.store.find_record("host1", "fs", "").unwrap();
    assert_eq!(record.color, Color::Yellow);
}

#[tokio::test]
async fn test_identical_report_is_idempotent() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.test1 yellow\nwarn", peer(), "", NOW).await;
    let before = daemon.store.find_record("host1", "test1", "").unwrap().clone();

    let recorder = Recorder::all(&daemon.channels);
    daemon.dispatch("status host1.test1 yellow\nwarn", peer(), "", NOW).await;
    settle().await;

    let after = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(after.last_change, before.last_change);
    assert_eq!(after.color, before.color);
    assert_eq!(recorder.count("stachg"), 0);
    assert_eq!(recorder.count("status"), 1);
}

#[tokio::test]
async fn test_combo_applies_every_part() {
    let mut daemon = daemon();
    let combo = "combo\nstatus host1.cpu green\nok\n\nstatus host1.disk red\nfull\n\nstatus host2.mem yellow\nlow";
    daemon.dispatch(combo, peer(), "", NOW).await;

    assert_eq!(daemon.store.find_record("host1", "cpu", "").unwrap().color, Color::Green);
    assert_eq!(daemon.store.find_record("host1", "disk", "").unwrap().color, Color::Red);
    assert_eq!(daemon.store.find_record("host2", "mem", "").unwrap().color, Color::Yellow);
    assert_eq!(daemon.stats.bogus(), 0);
}

#[tokio::test]
async fn test_unknown_host_is_a_ghost() {
    let mut daemon = daemon();
    daemon.dispatch("status nosuchhost.cpu red\nfail", peer(), "", NOW).await;

    assert!(daemon.store.host("nosuchhost").is_none());
    let reply = daemon.dispatch("ghostlist", peer(), "", NOW).await;
    assert_eq!(reply, Reply::Text(format!("nosuchhost|127.0.0.1|{NOW}\n")));
}

#[tokio::test]
async fn test_scheduled_command_runs_on_tick() {
    let mut daemon = daemon();
    daemon
        .dispatch(&format!("schedule {} disable host1.test1 10 planned", NOW + 30), peer(), "", NOW)
        .await;
    daemon.dispatch("status host1.test1 green\nok", peer(), "", NOW).await;

    let reply = daemon.dispatch("schedule", peer(), "", NOW).await;
    assert!(matches!(reply, Reply::Text(ref text) if text.contains("disable host1.test1")));

    daemon.tick(NOW + 30).await;
    let record = daemon.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(record.color, Color::Blue);
    assert_eq!(record.enabled_at, NOW + 30 + 600);
    assert!(daemon.scheduler.is_empty());
}

#[tokio::test]
async fn test_board_lists_records() {
    let mut daemon = daemon();
    daemon.dispatch("status host1.cpu green\nok", peer(), "", NOW).await;
    daemon.dispatch("status host1.disk red\nfull", peer(), "", NOW).await;

    let reply = daemon
        .dispatch("hobbitdboard host=host1 fields=hostname,testname,color", peer(), "", NOW)
        .await;
    let Reply::Text(board) = reply else {
        panic!("expected a board, got {reply:?}");
    };
    let lines: Vec<&str> = board.lines().collect();
    assert_eq!(
        lines,
        vec![
            "host1|trends|green",
            "host1|info|green",
            "host1|cpu|green",
            "host1|disk|red"
        ]
    );

    let reply = daemon
        .dispatch("hobbitdboard color=red fields=hostname,testname", peer(), "", NOW)
        .await;
    assert_eq!(reply, Reply::Text("host1|disk\n".to_string()));
}
