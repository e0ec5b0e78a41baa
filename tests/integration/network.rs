//! Talking to a running daemon over TCP

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hobbitd::actors::daemon::DaemonHandle;
use hobbitd::channels::ChannelKind;
use hobbitd::daemon::Daemon;
use hobbitd::registry::StaticRegistry;
use hobbitd::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use super::helpers::test_config;

struct Running {
    addr: SocketAddr,
    handle: DaemonHandle,
    _stop: oneshot::Sender<()>,
}

async fn start(timeout: Duration) -> Running {
    let config = test_config();
    let registry = StaticRegistry::from_entries(config.hosts.clone());
    let now = chrono::Utc::now().timestamp();
    let handle = DaemonHandle::spawn(Daemon::new(config, Arc::new(registry), now));

    let server = Server::bind("127.0.0.1:0".parse().unwrap(), handle.clone(), timeout)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.run(async move {
        let _ = stopped.await;
    }));

    Running {
        addr,
        handle,
        _stop: stop,
    }
}

async fn send(addr: SocketAddr, message: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(message.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await.unwrap();
    reply
}

#[tokio::test]
async fn test_status_then_query() {
    let daemon = start(Duration::from_secs(5)).await;

    assert_eq!(send(daemon.addr, "status host1.cpu red\nbroken").await, "");
    assert_eq!(send(daemon.addr, "query host1.cpu").await, "red broken\n");
    assert_eq!(send(daemon.addr, "query host1.nothing").await, "");
}

#[tokio::test]
async fn test_ping() {
    let daemon = start(Duration::from_secs(5)).await;
    let reply = send(daemon.addr, "ping").await;
    assert_eq!(reply, format!("hobbitd {}\n", hobbitd::VERSION));
}

#[tokio::test]
async fn test_concurrent_clients() {
    let daemon = start(Duration::from_secs(5)).await;

    let clients: Vec<_> = (0..20)
        .map(|i| {
            let addr = daemon.addr;
            tokio::spawn(async move { send(addr, &format!("status host1.test{i} green\nok")).await })
        })
        .collect();
    for client in clients {
        client.await.unwrap();
    }

    let stats = daemon.handle.stats().await.unwrap();
    assert_eq!(stats.records, 20);
    assert_eq!(stats.messages, 20);
}

#[tokio::test]
async fn test_channel_subscription_streams_events() {
    let daemon = start(Duration::from_secs(5)).await;

    let mut worker = TcpStream::connect(daemon.addr).await.unwrap();
    worker.write_all(b"channel stachg").await.unwrap();
    worker.shutdown().await.unwrap();

    let channel = daemon.handle.channels().get(ChannelKind::StatusChange).clone();
    for _ in 0..100 {
        if channel.readers() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(channel.readers(), 1);

    send(daemon.addr, "status host1.disk yellow\n85% used").await;

    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    while !String::from_utf8_lossy(&received).ends_with("\n@@\n") {
        let n = tokio::time::timeout(Duration::from_secs(2), worker.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "subscription closed early");
        received.extend_from_slice(&buf[..n]);
    }

    let message = String::from_utf8(received).unwrap();
    assert!(message.starts_with("@@stachg#1/host1|"));
    assert!(message.contains("85% used"));
}

#[tokio::test]
async fn test_slow_client_times_out() {
    let daemon = start(Duration::from_millis(200)).await;

    let mut stream = TcpStream::connect(daemon.addr).await.unwrap();
    stream.write_all(b"status host1.cpu green").await.unwrap();

    // never finish the request
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let stats = daemon.handle.stats().await.unwrap();
    assert_eq!(stats.bogus, 1);
    assert_eq!(stats.records, 0);
}
