//! The broadcast barrier: one message in flight per channel

use std::time::Duration;

use assert_matches::assert_matches;
use hobbitd::channels::{ChannelKind, ChannelSet, Envelope, PostOutcome};

fn channels(watchdog_ms: u64) -> ChannelSet {
    ChannelSet::new(64 * 1024, Duration::from_millis(watchdog_ms))
}

fn envelope(payload: &str) -> Envelope {
    Envelope::new("status", Some("host1"), "127.0.0.1", payload.to_string())
}

#[tokio::test]
async fn test_post_without_readers_is_dropped() {
    let channels = channels(100);
    let outcome = channels.post(ChannelKind::Status, &envelope("nobody listens")).await;
    assert_eq!(outcome, PostOutcome::NoReaders);
    assert_eq!(channels.get(ChannelKind::Status).message_count(), 0);
}

#[tokio::test]
async fn test_slow_reader_stalls_next_post() {
    let channels = channels(100);
    let _idle = channels.subscribe(ChannelKind::Status);

    let first = channels.post(ChannelKind::Status, &envelope("one")).await;
    assert_matches!(first, PostOutcome::Delivered { seq: 1, readers: 1 });

    let started = tokio::time::Instant::now();
    let second = channels.post(ChannelKind::Status, &envelope("two")).await;
    assert_eq!(second, PostOutcome::Stalled);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_every_reader_sees_every_message() {
    let channels = channels(1000);
    let mut a = channels.subscribe(ChannelKind::Page);
    let mut b = channels.subscribe(ChannelKind::Page);

    let readers = tokio::spawn(async move {
        let mut seen = vec![];
        for _ in 0..3 {
            let (x, y) = tokio::join!(a.recv(), b.recv());
            assert_eq!(x, y);
            seen.push(x.unwrap().to_string());
        }
        seen
    });

    for payload in ["one", "two", "three"] {
        let outcome = channels.post(ChannelKind::Page, &envelope(payload)).await;
        assert_matches!(outcome, PostOutcome::Delivered { readers: 2, .. });
    }

    let seen = readers.await.unwrap();
    assert!(seen[0].starts_with("@@status#1/host1|"));
    assert!(seen[1].starts_with("@@status#2/host1|"));
    assert!(seen[2].ends_with("|127.0.0.1|three\n@@\n"));
}

#[tokio::test]
async fn test_dropping_reader_releases_barrier() {
    let channels = channels(5000);
    let subscriber = channels.subscribe(ChannelKind::Data);

    channels.post(ChannelKind::Data, &envelope("one")).await;
    drop(subscriber);

    let started = tokio::time::Instant::now();
    let outcome = channels.post(ChannelKind::Data, &envelope("two")).await;
    assert_eq!(outcome, PostOutcome::NoReaders);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_channels_are_independent() {
    let channels = channels(100);
    let _idle = channels.subscribe(ChannelKind::Status);
    let mut notes = channels.subscribe(ChannelKind::Notes);

    channels.post(ChannelKind::Status, &envelope("stuck")).await;

    let outcome = channels.post(ChannelKind::Notes, &envelope("note")).await;
    assert_matches!(outcome, PostOutcome::Delivered { seq: 1, .. });
    assert!(notes.recv().await.is_some());
}

#[tokio::test]
async fn test_oversized_message_is_truncated() {
    let channels = ChannelSet::new(256, Duration::from_millis(100));
    let mut subscriber = channels.subscribe(ChannelKind::Client);

    let payload = "x".repeat(4096);
    channels.post(ChannelKind::Client, &envelope(&payload)).await;

    let message = subscriber.recv().await.unwrap();
    assert!(message.len() < 256);
    assert!(message.ends_with("\n@@\n"));
}

#[tokio::test]
async fn test_close_wakes_readers() {
    let channels = channels(100);
    let mut subscriber = channels.subscribe(ChannelKind::User);

    channels.close();
    assert_eq!(subscriber.recv().await, None);
    assert_eq!(
        channels.post(ChannelKind::User, &envelope("late")).await,
        PostOutcome::Closed
    );
}

#[tokio::test]
async fn test_stats_count_messages_and_readers() {
    let channels = channels(1000);
    let mut subscriber = channels.subscribe(ChannelKind::StatusChange);

    channels.post(ChannelKind::StatusChange, &envelope("one")).await;
    subscriber.recv().await;
    channels.post(ChannelKind::StatusChange, &envelope("two")).await;

    let stats = channels.stats();
    let stachg = stats
        .iter()
        .find(|s| s.kind == ChannelKind::StatusChange)
        .unwrap();
    assert_eq!(stachg.messages, 2);
    assert_eq!(stachg.readers, 1);
}
