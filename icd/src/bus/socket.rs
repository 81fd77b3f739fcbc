//! Unix socket bus client

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use super::protocol::{ClientFrame, FrameRead, ServerFrame, encode_line, read_frame};
use super::{BusError, MessageBus, Subscription, default_socket_path};

/// Default timeout for connect, write and subscribe acknowledgement
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-subscription buffer
const DEFAULT_BUFFER: usize = 1024;

/// [`MessageBus`] backed by a [`Broker`](super::Broker) socket
///
/// Publishing shares one lazily opened connection. Each subscription owns its
/// own connection, so losing it ends exactly that subscription.
pub struct SocketBus {
    socket_path: PathBuf,
    timeout: Duration,
    buffer: usize,
    publisher: Mutex<Option<UnixStream>>,
}

impl Default for SocketBus {
    fn default() -> Self {
        Self::new(default_socket_path())
    }
}

impl SocketBus {
    /// Create a client for the broker at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
            buffer: DEFAULT_BUFFER,
            publisher: Mutex::new(None),
        }
    }

    /// Set a custom I/O timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-subscription buffer
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Check if the broker socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    async fn connect(&self) -> Result<UnixStream, BusError> {
        debug!(socket = ?self.socket_path, "SocketBus::connect: called");
        match tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(BusError::Disconnected(format!(
                "Failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))),
            Err(_) => Err(BusError::Timeout(self.timeout)),
        }
    }

    async fn write_line(&self, stream: &mut UnixStream, line: &str) -> Result<(), BusError> {
        match tokio::time::timeout(self.timeout, stream.write_all(line.as_bytes())).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BusError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl MessageBus for SocketBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        debug!(%channel, bytes = payload.len(), "SocketBus::publish: called");
        let line = encode_line(&ClientFrame::Publish {
            channel: channel.to_string(),
            payload,
        })?;

        let mut publisher = self.publisher.lock().await;

        // A cached connection may have been closed by a broker restart; retry
        // once on a fresh one before reporting the bus as down.
        if let Some(stream) = publisher.as_mut() {
            match self.write_line(stream, &line).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(error = %e, "SocketBus::publish: cached connection failed");
                    *publisher = None;
                }
            }
        }

        let mut stream = self.connect().await?;
        self.write_line(&mut stream, &line)
            .await
            .map_err(|e| BusError::Disconnected(e.to_string()))?;
        *publisher = Some(stream);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        debug!(%channel, "SocketBus::subscribe: called");
        let mut stream = self.connect().await?;
        let line = encode_line(&ClientFrame::Subscribe {
            channel: channel.to_string(),
        })?;
        self.write_line(&mut stream, &line).await?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let (tx, rx) = mpsc::channel(self.buffer);

        match tokio::time::timeout(self.timeout, read_ack(&mut reader, channel, &tx)).await {
            Ok(result) => result?,
            Err(_) => return Err(BusError::Timeout(self.timeout)),
        }

        let channel_name = channel.to_string();
        tokio::spawn(async move {
            // Keep the write half alive so the broker does not see a half-close
            let _write_half = write_half;
            let mut buf = Vec::new();
            loop {
                let read = tokio::select! {
                    _ = tx.closed() => {
                        debug!(channel = %channel_name, "SocketBus: subscription dropped");
                        break;
                    }
                    read = read_frame(&mut reader, &mut buf) => read,
                };
                match read {
                    Ok(FrameRead::Frame) => {}
                    Ok(FrameRead::Oversized(bytes)) => {
                        warn!(channel = %channel_name, bytes, "SocketBus: frame too large, skipping");
                        continue;
                    }
                    Ok(FrameRead::Eof) => break,
                    Err(e) => {
                        debug!(channel = %channel_name, error = %e, "SocketBus: read failed");
                        break;
                    }
                }
                match serde_json::from_slice::<ServerFrame>(&buf) {
                    Ok(ServerFrame::Message { payload, .. }) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerFrame::Subscribed { .. }) => {}
                    Err(e) => warn!(channel = %channel_name, error = %e, "SocketBus: malformed frame, skipping"),
                }
            }
            debug!(channel = %channel_name, "SocketBus: subscription connection closed");
        });

        Ok(Subscription::new(channel, rx))
    }
}

/// Wait for the broker to acknowledge a subscription
///
/// Messages can race ahead of the acknowledgement; they are kept.
async fn read_ack(
    reader: &mut BufReader<OwnedReadHalf>,
    channel: &str,
    tx: &mpsc::Sender<String>,
) -> Result<(), BusError> {
    let mut buf = Vec::new();
    loop {
        match read_frame(reader, &mut buf).await? {
            FrameRead::Frame => {}
            FrameRead::Oversized(bytes) => {
                warn!(%channel, bytes, "read_ack: frame too large, skipping");
                continue;
            }
            FrameRead::Eof => {
                return Err(BusError::Disconnected("Broker closed before acknowledging".to_string()));
            }
        }
        match serde_json::from_slice::<ServerFrame>(&buf)? {
            ServerFrame::Subscribed { channel: acked } if acked == channel => return Ok(()),
            ServerFrame::Message { payload, .. } => {
                let _ = tx.try_send(payload);
            }
            other => debug!(?other, "read_ack: ignoring frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_without_broker_is_disconnected() {
        let temp = TempDir::new().unwrap();
        let bus = SocketBus::new(temp.path().join("missing.sock"));

        let result = bus.publish("alerts", "{}".to_string()).await;
        assert!(matches!(result, Err(BusError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_subscribe_without_broker_fails() {
        let temp = TempDir::new().unwrap();
        let bus = SocketBus::new(temp.path().join("missing.sock")).with_timeout(Duration::from_millis(200));

        assert!(bus.subscribe("alerts").await.is_err());
        assert!(!bus.socket_exists());
    }
}
