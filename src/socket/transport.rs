//! Byte-stream transports a [`Socket`](super::Socket) can own.
//!
//! A transport is any duplex byte pipe: a TCP stream, a WebSocket proxy, or
//! an in-process double for tests. The socket never talks to the network
//! directly — it pushes whole buffers into [`Transport::send`] and consumes
//! [`TransportEvent`]s the transport's driver produced.
//!
//! [`TcpTransport`] is the built-in implementation: a pair of background
//! tasks move bytes between the stream and channels, so sends from the
//! socket stay synchronous (a channel push) and receives arrive as events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::RfbError;

// ── ReadyState ───────────────────────────────────────────────────

/// Connection state as reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
    /// The transport type has no analogous state to report.
    Unknown,
}

// ── TransportEvent ───────────────────────────────────────────────

/// Events a transport driver delivers to the socket owner.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    /// A binary frame or stream chunk.
    Message(Bytes),
    /// A text frame carrying base64-encoded payload (legacy proxies).
    Text(String),
    Close { code: u16, reason: String },
    Error(String),
}

// ── Transport ────────────────────────────────────────────────────

/// A duplex byte-stream the socket can exclusively own.
pub trait Transport: Send {
    /// Write one buffer. Must not block the caller; transports with real
    /// I/O hand the buffer to a writer task.
    fn send(&mut self, data: &[u8]) -> Result<(), RfbError>;

    /// Request a close. Idempotent.
    fn close(&mut self, code: Option<u16>, reason: &str);

    fn ready_state(&self) -> ReadyState;
}

// ── TcpTransport ─────────────────────────────────────────────────

// Shared state codes for the background tasks.
const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// TCP transport with background reader/writer tasks.
///
/// The reader task turns stream chunks into [`TransportEvent::Message`]s on
/// the event channel handed to [`TcpTransport::connect`]; the writer task
/// drains a channel of outgoing buffers. Dropping the transport (or calling
/// [`Transport::close`]) stops the writer, which shuts down the stream's
/// write half; the peer's close then surfaces as a `Close` event.
pub struct TcpTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    state: Arc<AtomicU8>,
}

impl TcpTransport {
    /// Connect to `addr` and spawn the I/O tasks. Events, including the
    /// initial [`TransportEvent::Open`], arrive on `events`.
    pub async fn connect(
        addr: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, RfbError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::spawn(stream, events))
    }

    /// Wrap an already-connected stream (used by tests and listeners).
    pub fn spawn(stream: TcpStream, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let state = Arc::new(AtomicU8::new(STATE_OPEN));
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let (mut read_half, mut write_half) = stream.into_split();

        // Writer task: socket -> network.
        let writer_state = state.clone();
        tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                if write_half.write_all(&buf).await.is_err() {
                    break;
                }
            }
            // Sender dropped or write failed: shut down our half.
            let _ = write_half.shutdown().await;
            writer_state.store(STATE_CLOSING, Ordering::SeqCst);
        });

        // Reader task: network -> events.
        let reader_state = state.clone();
        let _ = events.send(TransportEvent::Open);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Close {
                            code: 1000,
                            reason: String::new(),
                        });
                        break;
                    }
                    Ok(n) => {
                        if events
                            .send(TransportEvent::Message(Bytes::copy_from_slice(&buf[..n])))
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        reader_state.store(STATE_CLOSED, Ordering::SeqCst);
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        let _ = events.send(TransportEvent::Close {
                            code: 1006,
                            reason: e.to_string(),
                        });
                        break;
                    }
                }
            }
        });

        Self {
            tx: Some(tx),
            state,
        }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), RfbError> {
        match &self.tx {
            Some(tx) => tx
                .send(Bytes::copy_from_slice(data))
                .map_err(|_| RfbError::ChannelClosed),
            None => Err(RfbError::TransportNotOpen),
        }
    }

    fn close(&mut self, _code: Option<u16>, _reason: &str) {
        if self.tx.take().is_some() {
            self.state.store(STATE_CLOSING, Ordering::SeqCst);
        }
    }

    fn ready_state(&self) -> ReadyState {
        match self.state.load(Ordering::SeqCst) {
            STATE_OPEN if self.tx.is_some() => ReadyState::Open,
            STATE_OPEN | STATE_CLOSING => ReadyState::Closing,
            STATE_CLOSED => ReadyState::Closed,
            _ => ReadyState::Unknown,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
