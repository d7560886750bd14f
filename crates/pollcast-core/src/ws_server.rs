// WebSocket server: accepts presenter and participant connections and bridges
// them to the coordinator over channels.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

/// Server-assigned identifier of one live connection.
pub type ConnectionId = u64;

/// Events emitted by the WebSocket server to the coordinator.
#[derive(Debug)]
pub enum WsEvent {
    /// A client completed the handshake. Text pushed into `outbound` is
    /// written to that client in order.
    Connected {
        id: ConnectionId,
        addr: String,
        outbound: mpsc::Sender<String>,
    },
    /// The client went away (close frame, read error or EOF).
    Disconnected { id: ConnectionId },
    /// A text frame from the client (raw JSON string).
    Message { id: ConnectionId, text: String },
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// Source of raw client streams. Abstracted so tests can hand the server
/// in-memory duplex pipes instead of TCP sockets.
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next client; returns the stream and a printable peer
    /// address.
    async fn accept(&mut self) -> std::io::Result<(Self::Stream, String)>;
}

/// TCP listener whose connections are upgraded to WebSockets.
pub struct TungsteniteListener {
    inner: TcpListener,
}

impl TungsteniteListener {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let inner = TcpListener::bind(addr).await?;
        Ok(TungsteniteListener { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[async_trait]
impl Listener for TungsteniteListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> std::io::Result<(TcpStream, String)> {
        let (stream, addr) = self.inner.accept().await?;
        Ok((stream, addr.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

/// Consecutive listener failures (other than a single client going away)
/// tolerated before the server gives up.
const MAX_ACCEPT_FAILURES: u32 = 32;

/// Longest pause between retries after a listener failure.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Accept connections until the event channel closes, serving each on its own
/// task.
///
/// Every connection gets a fresh [`ConnectionId`] and an outbound queue of
/// `outbound_buffer` frames. A client that resets during the accept is
/// skipped. Other accept errors (such as running out of file descriptors) are
/// retried with a growing backoff; `MAX_ACCEPT_FAILURES` in a row is an
/// error.
pub async fn run<L: Listener>(
    mut listener: L,
    tx: mpsc::Sender<WsEvent>,
    outbound_buffer: usize,
) -> anyhow::Result<()> {
    let mut next_id: ConnectionId = 0;
    let mut failures: u32 = 0;

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = tx.closed() => break,
        };

        let (stream, addr) = match accepted {
            Ok(conn) => {
                failures = 0;
                conn
            }
            Err(e) if is_client_error(&e) => {
                debug!("Client went away during accept: {e}");
                continue;
            }
            Err(e) => {
                failures += 1;
                if failures >= MAX_ACCEPT_FAILURES {
                    return Err(anyhow::Error::new(e)
                        .context(format!("accept failed {failures} times in a row")));
                }
                let backoff = accept_backoff(failures);
                warn!("Accept failed ({e}), retrying in {backoff:?}");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => continue,
                    _ = tx.closed() => break,
                }
            }
        };

        next_id += 1;
        info!("Accepted connection #{next_id} from {addr}");

        let tx = tx.clone();
        tokio::spawn(serve_connection(stream, next_id, addr, tx, outbound_buffer));
    }

    info!("Event channel closed, WebSocket server stopping");
    Ok(())
}

/// Errors that concern one incoming client rather than the listener.
fn is_client_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

/// 10ms doubling per consecutive failure, capped at `MAX_ACCEPT_BACKOFF`.
fn accept_backoff(failures: u32) -> Duration {
    let millis = 10u64.saturating_mul(1u64 << failures.saturating_sub(1).min(16));
    Duration::from_millis(millis).min(MAX_ACCEPT_BACKOFF)
}

/// Perform the WebSocket handshake on `stream`, then pump frames in both
/// directions until the client leaves.
pub async fn serve_connection<S>(
    stream: S,
    id: ConnectionId,
    addr: String,
    tx: mpsc::Sender<WsEvent>,
    outbound_buffer: usize,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };

    let (out_tx, out_rx) = mpsc::channel(outbound_buffer);
    if tx
        .send(WsEvent::Connected {
            id,
            addr: addr.clone(),
            outbound: out_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let (write, read) = ws_stream.split();
    let writer = tokio::spawn(forward_outbound(out_rx, write, addr.clone()));

    if process_messages(read, &tx, id, &addr).await.is_ok() {
        let _ = tx.send(WsEvent::Disconnected { id }).await;
    }
    writer.abort();
    info!("Connection #{id} from {addr} finished");
}

/// Write queued frames to the client until the queue's sender is dropped,
/// then send a close frame.
pub async fn forward_outbound<W>(mut rx: mpsc::Receiver<String>, mut sink: W, addr: String)
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!("Failed to write to {addr}: {e}");
            return;
        }
    }
    debug!("Outbound queue for {addr} closed, sending close frame");
    let _ = sink.send(Message::Close(None)).await;
}

/// Forward text frames from `stream` through `tx` as [`WsEvent::Message`].
///
/// Generic over the stream type so it can be tested with in-memory streams.
/// Returns `Err(())` if the event channel is closed (receiver dropped),
/// signalling the caller to stop.
pub async fn process_messages<St>(
    mut stream: St,
    tx: &mpsc::Sender<WsEvent>,
    id: ConnectionId,
    addr: &str,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let event = WsEvent::Message {
                    id,
                    text: text.to_string(),
                };
                if tx.send(event).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("Client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    Ok(())
}
