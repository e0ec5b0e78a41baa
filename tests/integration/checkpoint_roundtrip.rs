//! Saving a daemon's state and loading it into a fresh one

use hobbitd::checkpoint;
use hobbitd::color::Color;
use pretty_assertions::assert_eq;

use super::helpers::*;

async fn populated() -> hobbitd::daemon::Daemon {
    let mut daemon = daemon();
    daemon.dispatch("status host1.cpu red\nload 12\nline two", peer(), "", NOW).await;
    daemon.dispatch("status host1.disk green\nok", peer(), "", NOW).await;
    daemon.dispatch("status host2.mem yellow\nlow | memory", peer(), "", NOW).await;
    daemon.dispatch("disable host1.disk 120 disk swap", peer(), "", NOW).await;

    let cookie = daemon
        .store
        .find_record("host1", "cpu", "")
        .and_then(|r| r.cookie)
        .unwrap();
    daemon
        .dispatch(&format!("hobbitdack {} 90 on it", cookie.id), peer(), "", NOW)
        .await;
    daemon
        .dispatch("ackinfo host1.cpu\n1\n3600\noperator\nlooking into it", peer(), "", NOW)
        .await;
    daemon
        .dispatch(&format!("schedule {} enable host1.disk", NOW + 3600), peer(), "", NOW)
        .await;
    daemon
}

#[tokio::test]
async fn test_roundtrip_keeps_records() {
    let original = populated().await;
    let text = original.snapshot(NOW);

    let mut restored = daemon();
    let report = restored.restore(&text, NOW + 10);
    assert_eq!(report.records, 3);
    assert_eq!(report.acks, 1);
    assert_eq!(report.tasks, 1);
    assert_eq!(report.skipped, 0);

    for (host, test) in [("host1", "cpu"), ("host1", "disk"), ("host2", "mem")] {
        let before = original.store.find_record(host, test, "").unwrap();
        let after = restored.store.find_record(host, test, "").unwrap();
        assert_eq!(after.color, before.color, "{host}.{test}");
        assert_eq!(after.old_color, before.old_color, "{host}.{test}");
        assert_eq!(after.flags, before.flags, "{host}.{test}");
        assert_eq!(after.log_time, before.log_time, "{host}.{test}");
        assert_eq!(after.last_change, before.last_change, "{host}.{test}");
        assert_eq!(after.valid_until, before.valid_until, "{host}.{test}");
        assert_eq!(after.enabled_at, before.enabled_at, "{host}.{test}");
        assert_eq!(after.ack_until, before.ack_until, "{host}.{test}");
        assert_eq!(after.message, before.message, "{host}.{test}");
        assert_eq!(after.dismsg, before.dismsg, "{host}.{test}");
        assert_eq!(after.ackmsg, before.ackmsg, "{host}.{test}");
        assert_eq!(after.active_alert, before.active_alert, "{host}.{test}");
        assert!(!after.history_synced);
    }

    let cpu = restored.store.find_record("host1", "cpu", "").unwrap();
    assert_eq!(cpu.color, Color::Red);
    assert_eq!(cpu.acks.len(), 1);
    assert_eq!(cpu.acks[0].acked_by, "operator");

    let cookie = cpu.cookie.unwrap();
    let key = restored.store.find_by_cookie(cookie.id, NOW + 10).unwrap();
    assert_eq!(key.host, "host1");

    assert_eq!(restored.scheduler.len(), 1);
    assert_eq!(restored.snapshot(NOW), text);
}

#[tokio::test]
async fn test_unknown_hosts_are_skipped() {
    let original = populated().await;
    let text = original.snapshot(NOW);

    let mut config = test_config();
    config.hosts.retain(|host| host.name == "host1");
    let mut restored = daemon_with(config);
    let report = restored.restore(&text, NOW + 10);

    assert_eq!(report.records, 2);
    assert_eq!(report.skipped, 1);
    assert!(restored.store.host("host2").is_none());
}

#[tokio::test]
async fn test_past_tasks_are_dropped() {
    let original = populated().await;
    let text = original.snapshot(NOW);

    let mut restored = daemon();
    let report = restored.restore(&text, NOW + 7200);
    assert_eq!(report.tasks, 0);
    assert!(restored.scheduler.is_empty());
}

#[tokio::test]
async fn test_legacy_header_is_accepted() {
    let original = populated().await;
    let text = original
        .snapshot(NOW)
        .replace(checkpoint::HEADER, "@@BBGENDCHK-V1");

    let mut restored = daemon();
    let report = restored.restore(&text, NOW + 10);
    assert_eq!(report.records, 3);
}

#[tokio::test]
async fn test_write_atomic_replaces_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hobbitd.chk");
    std::fs::write(&path, "old contents").unwrap();

    let daemon = populated().await;
    let text = daemon.snapshot(NOW);
    checkpoint::write_atomic(&path, &text, NOW).unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[tokio::test]
async fn test_roundtrip_keeps_pipes_in_flags_and_sender() {
    let mut original = daemon();
    original
        .dispatch(
            "status host1.test1 red <!-- [flags:a|b] --> fail\nbody\nStatus message received from relay|7\n",
            peer(),
            "",
            NOW,
        )
        .await;
    let before = original.store.find_record("host1", "test1", "").unwrap().clone();
    assert_eq!(before.flags, "a|b");
    assert_eq!(before.sender, "relay|7");

    let mut restored = daemon();
    let report = restored.restore(&original.snapshot(NOW), NOW + 10);
    assert_eq!(report.records, 1);
    assert_eq!(report.skipped, 0);

    let after = restored.store.find_record("host1", "test1", "").unwrap();
    assert_eq!(after.flags, before.flags);
    assert_eq!(after.sender, before.sender);
    assert_eq!(after.message, before.message);
    assert_eq!(after.cookie, before.cookie);
    assert_eq!(after.valid_until, before.valid_until);
}

#[tokio::test]
async fn test_acks_stay_with_their_origin() {
    let mut original = daemon();
    original.dispatch("status host1.cpu red\nload", peer(), "", NOW).await;
    original.dispatch("status host1.cpu red\nload", peer(), "synthetic", NOW).await;
    original
        .dispatch("ackinfo host1.cpu\n1\n3600\noperator\nlooking", peer(), "", NOW)
        .await;

    let key = original.store.key("host1", "cpu", "").unwrap();
    original.store.record_mut(&key).unwrap().acks.clear();

    let mut restored = daemon();
    let report = restored.restore(&original.snapshot(NOW), NOW + 10);
    assert_eq!(report.acks, 1);

    let plain = restored.store.find_record("host1", "cpu", "").unwrap();
    let synthetic = restored.store.find_record("host1", "cpu", "synthetic").unwrap();
    assert!(plain.acks.is_empty());
    assert_eq!(synthetic.acks.len(), 1);
    assert_eq!(synthetic.acks[0].acked_by, "operator");
}
