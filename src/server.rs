//! TCP front end
//!
//! One task per connection. A request is everything the client sends
//! until it closes its write side; the reply, if any, is written back
//! before the connection is closed. A `channel` request keeps the
//! connection open and streams a broadcast channel to it instead.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::actors::daemon::DaemonHandle;
use crate::channels::ChannelKind;
use crate::protocol::Reply;

/// Receive buffer size for a fresh connection
pub const INITIAL_BUFFER: usize = 128 * 1024;

/// Receive buffer growth step
pub const BUFFER_STEP: usize = 32 * 1024;

/// Largest message accepted; anything beyond is cut off
pub const MAX_MESSAGE: usize = 10 * 1024 * 1024;

/// Read until end of stream, truncating at [`MAX_MESSAGE`]
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(INITIAL_BUFFER);
    let mut chunk = vec![0u8; BUFFER_STEP];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let room = MAX_MESSAGE - buf.len();
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            warn!("message exceeds {MAX_MESSAGE} bytes, truncated");
            break;
        }

        if buf.capacity() - buf.len() < n {
            buf.reserve_exact(BUFFER_STEP);
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(buf)
}

pub struct Server {
    listener: TcpListener,
    handle: DaemonHandle,
    timeout: Duration,
}

impl Server {
    pub async fn bind(addr: SocketAddr, handle: DaemonHandle, timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle,
            timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("no longer accepting connections");
                    return Ok(());
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        trace!("connection from {peer}");
                        tokio::spawn(handle_connection(stream, peer, self.handle.clone(), self.timeout));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
}

#[instrument(skip(stream, handle, limit))]
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, handle: DaemonHandle, limit: Duration) {
    let exchange = async {
        let raw = read_message(&mut stream)
            .await
            .context("failed to read request")?;
        if raw.is_empty() {
            debug!("empty request");
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&raw).into_owned();
        match handle.submit(text, peer.ip()).await? {
            Reply::None => {}
            Reply::Text(text) => stream
                .write_all(text.as_bytes())
                .await
                .context("failed to write reply")?,
            Reply::Bytes(bytes) => stream
                .write_all(&bytes)
                .await
                .context("failed to write reply")?,
            Reply::Subscribe(kind) => return Ok(Some(kind)),
        }
        let _ = stream.shutdown().await;
        anyhow::Ok(None)
    };

    match timeout(limit, exchange).await {
        Ok(Ok(Some(kind))) => stream_channel(stream, kind, &handle).await,
        Ok(Ok(None)) => {}
        Ok(Err(e)) => debug!("connection failed: {e:#}"),
        Err(_) => {
            warn!("connection timed out after {}s", limit.as_secs());
            if let Err(e) = handle.report_timeout().await {
                debug!("{e:#}");
            }
        }
    }
}

/// Feed every message of one channel to an attached worker
async fn stream_channel(mut stream: TcpStream, kind: ChannelKind, handle: &DaemonHandle) {
    let mut subscriber = handle.channels().subscribe(kind);
    info!("worker attached to {} channel", kind.name());

    while let Some(message) = subscriber.recv().await {
        if let Err(e) = stream.write_all(message.as_bytes()).await {
            debug!("worker on {} channel went away: {e}", kind.name());
            break;
        }
    }

    info!("worker detached from {} channel", kind.name());
}
