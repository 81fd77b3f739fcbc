//! Unix socket message broker
//!
//! A tiny fan-out relay for running the coordinator and analyzers as separate
//! processes. Every connection may subscribe to any number of channels and
//! publish to any channel; the broker copies each published payload to every
//! connection subscribed to that channel at that moment.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use eyre::{Context, Result};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::listener::shutdown_requested;
use super::protocol::{ClientFrame, FrameRead, ServerFrame, encode_line, read_frame};

type Routes = Arc<DashMap<String, Vec<mpsc::Sender<String>>>>;

/// Create and bind a listener at `socket_path`
///
/// Creates the parent directory and removes a stale socket from a previous run.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: called");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind bus socket")?;
    debug!(?socket_path, "create_listener_at: socket bound");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Channel broker serving [`SocketBus`](super::SocketBus) clients
pub struct Broker {
    listener: UnixListener,
    socket_path: PathBuf,
    buffer: usize,
    routes: Routes,
}

impl Broker {
    /// Bind the broker socket
    ///
    /// `buffer` bounds the outbound queue of each connection; a connection that
    /// falls further behind misses messages instead of stalling publishers.
    pub fn bind(socket_path: impl AsRef<Path>, buffer: usize) -> Result<Self> {
        let (listener, socket_path) = create_listener_at(socket_path.as_ref())?;
        Ok(Self {
            listener,
            socket_path,
            buffer: buffer.max(1),
            routes: Arc::new(DashMap::new()),
        })
    }

    /// Path the broker is listening on
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(socket = ?self.socket_path, "Broker listening");
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => {
                    debug!("Broker::run: shutdown requested");
                    break;
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        debug!("Broker::run: accepted connection");
                        connections.spawn(serve_connection(stream, self.routes.clone(), self.buffer));
                    }
                    Err(e) => warn!(error = %e, "Broker: accept failed"),
                },
            }
        }

        connections.shutdown().await;
        cleanup_socket(&self.socket_path);
        info!("Broker stopped");
        Ok(())
    }
}

/// Copy a payload to every live subscriber of `channel`
fn route(routes: &Routes, channel: &str, payload: String) {
    let line = match encode_line(&ServerFrame::Message {
        channel: channel.to_string(),
        payload,
    }) {
        Ok(line) => line,
        Err(e) => {
            warn!(%channel, error = %e, "Broker: dropping unroutable message");
            return;
        }
    };

    if let Some(mut subs) = routes.get_mut(channel) {
        subs.retain(|tx| match tx.try_send(line.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%channel, "Broker: subscriber queue full, dropping message");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
    routes.remove_if(channel, |_, subs| subs.is_empty());
}

/// Remove one connection's queue from `channel`, dropping the route once empty
fn detach(routes: &Routes, channel: &str, tx: &mpsc::Sender<String>) {
    if let Some(mut subs) = routes.get_mut(channel) {
        subs.retain(|sub| !sub.same_channel(tx));
    }
    routes.remove_if(channel, |_, subs| subs.is_empty());
}

async fn serve_connection(stream: UnixStream, routes: Routes, buffer: usize) {
    let (read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(buffer);

    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if let Err(e) = write_half.write_all(line.as_bytes()).await {
                debug!(error = %e, "serve_connection: write failed");
                break;
            }
        }
    });

    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let mut subscribed: Vec<String> = Vec::new();
    loop {
        match read_frame(&mut reader, &mut buf).await {
            Ok(FrameRead::Frame) => {}
            Ok(FrameRead::Oversized(bytes)) => {
                warn!(bytes, "Broker: frame too large, skipping");
                continue;
            }
            Ok(FrameRead::Eof) => break,
            Err(e) => {
                debug!(error = %e, "serve_connection: read failed");
                break;
            }
        }

        let frame: ClientFrame = match serde_json::from_slice(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Broker: malformed frame, skipping");
                continue;
            }
        };

        match frame {
            ClientFrame::Subscribe { channel } => {
                debug!(%channel, "serve_connection: subscribe");
                routes.entry(channel.clone()).or_default().push(out_tx.clone());
                subscribed.push(channel.clone());
                match encode_line(&ServerFrame::Subscribed { channel }) {
                    Ok(ack) => {
                        if out_tx.send(ack).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Broker: failed to encode ack"),
                }
            }
            ClientFrame::Publish { channel, payload } => route(&routes, &channel, payload),
        }
    }

    for channel in &subscribed {
        detach(&routes, channel, &out_tx);
    }
    debug!("serve_connection: connection closed");
    writer.abort();
}
