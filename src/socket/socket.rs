//! The socket: one receive queue + one send queue bound to one transport.
//!
//! Every decoder and the RA2 handshake consume bytes through the `rq_*`
//! methods and produce bytes through the `sq_*` methods; neither ever sees
//! the transport. The connection owner feeds transport events in through
//! [`Socket::handle_event`] and reacts to the [`SocketEvent`]s that come
//! back out.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::RfbError;
use crate::socket::queue::{ByteQueue, SendQueue};
use crate::socket::transport::{ReadyState, TcpTransport, Transport, TransportEvent};

// ── SocketState ──────────────────────────────────────────────────

/// Lifecycle state, derived live from the owned transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No transport has ever been attached, or the last one was released.
    Unused,
    Connecting,
    Open,
    Closing,
    Closed,
    Unknown,
}

// ── SocketEvent ──────────────────────────────────────────────────

/// What the owner should react to after feeding in a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    /// New bytes are queued; drive the decode loop. Only raised when the
    /// receive queue is non-empty afterwards — empty frames are swallowed.
    DataReady,
    Closed { code: u16, reason: String },
    Error(String),
}

// ── Socket ───────────────────────────────────────────────────────

/// Buffered byte-stream endpoint over one exclusive transport.
pub struct Socket {
    rq: ByteQueue,
    sq: SendQueue,
    transport: Option<Box<dyn Transport>>,
    /// Set by [`Socket::close`] so late frames from the old transport are
    /// discarded instead of re-entering the decode path.
    ignore_incoming: bool,
}

impl Socket {
    pub fn new() -> Self {
        Self {
            rq: ByteQueue::new(),
            sq: SendQueue::new(),
            transport: None,
            ignore_incoming: false,
        }
    }

    /// Connect a TCP transport to `addr` and adopt it. The returned channel
    /// carries the transport's events; pass each one to
    /// [`Socket::handle_event`].
    pub async fn open(
        &mut self,
        addr: &str,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, RfbError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = TcpTransport::connect(addr, tx).await?;
        self.attach(Box::new(transport));
        Ok(rx)
    }

    /// Adopt an already-connected transport, fully releasing any previous
    /// one and resetting both queues.
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.rq.clear();
        self.sq.clear();
        self.ignore_incoming = false;
        self.transport = Some(transport);
    }

    /// Request a close. Receive processing is detached first, so no bytes
    /// arriving after this call are ever queued — even if the transport
    /// delivers late events.
    pub fn close(&mut self) {
        self.ignore_incoming = true;
        if let Some(transport) = &mut self.transport {
            match transport.ready_state() {
                ReadyState::Open | ReadyState::Connecting => {
                    transport.close(Some(1000), "");
                }
                _ => {}
            }
        }
    }

    pub fn state(&self) -> SocketState {
        match &self.transport {
            None => SocketState::Unused,
            Some(t) => match t.ready_state() {
                ReadyState::Connecting => SocketState::Connecting,
                ReadyState::Open => SocketState::Open,
                ReadyState::Closing => SocketState::Closing,
                ReadyState::Closed => SocketState::Closed,
                ReadyState::Unknown => SocketState::Unknown,
            },
        }
    }

    /// Feed one transport event through the socket. Returns the event the
    /// owner should act on, if any.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<SocketEvent> {
        match event {
            TransportEvent::Open => Some(SocketEvent::Open),
            TransportEvent::Message(data) => self.enqueue(&data),
            TransportEvent::Text(text) => match BASE64.decode(text.as_bytes()) {
                Ok(decoded) => self.enqueue(&decoded),
                Err(e) => Some(SocketEvent::Error(format!("bad base64 frame: {e}"))),
            },
            TransportEvent::Close { code, reason } => {
                self.transport = None;
                Some(SocketEvent::Closed { code, reason })
            }
            TransportEvent::Error(e) => Some(SocketEvent::Error(e)),
        }
    }

    fn enqueue(&mut self, data: &[u8]) -> Option<SocketEvent> {
        if self.ignore_incoming {
            return None;
        }
        self.rq.append(data);
        trace!(bytes = data.len(), queued = self.rq.len(), "frame queued");
        // Guard against spurious empty frames.
        if self.rq.is_empty() {
            None
        } else {
            Some(SocketEvent::DataReady)
        }
    }

    // ── Receive queue ────────────────────────────────────────────

    /// Unread bytes available.
    pub fn rq_len(&self) -> usize {
        self.rq.len()
    }

    /// `true` when fewer than `need` bytes are available; rewinds the read
    /// cursor by `lookback` in that case (see [`ByteQueue::wait`]).
    pub fn rq_wait(&mut self, need: usize, lookback: usize) -> bool {
        self.rq.wait(need, lookback)
    }

    pub fn rq_peek8(&self) -> u8 {
        self.rq.peek8()
    }

    pub fn rq_peek_bytes(&self, len: usize) -> &[u8] {
        self.rq.peek_bytes(len)
    }

    pub fn rq_shift8(&mut self) -> u8 {
        self.rq.shift8()
    }

    pub fn rq_shift16(&mut self) -> u16 {
        self.rq.shift16()
    }

    pub fn rq_shift32(&mut self) -> u32 {
        self.rq.shift32()
    }

    pub fn rq_shift_bytes(&mut self, len: usize) -> Vec<u8> {
        self.rq.shift_bytes(len)
    }

    pub fn rq_shift_bytes_mut(&mut self, len: usize) -> &mut [u8] {
        self.rq.shift_bytes_mut(len)
    }

    pub fn rq_skip_bytes(&mut self, n: usize) {
        self.rq.skip_bytes(n)
    }

    pub fn rq_shift_into(&mut self, target: &mut [u8]) {
        self.rq.shift_into(target)
    }

    // ── Send queue ───────────────────────────────────────────────

    pub fn sq_push8(&mut self, value: u8) -> Result<(), RfbError> {
        self.sq_push_bytes(&[value])
    }

    pub fn sq_push16(&mut self, value: u16) -> Result<(), RfbError> {
        self.sq_push_bytes(&value.to_be_bytes())
    }

    pub fn sq_push32(&mut self, value: u32) -> Result<(), RfbError> {
        self.sq_push_bytes(&value.to_be_bytes())
    }

    /// Push a string's raw bytes (no length prefix, no terminator).
    pub fn sq_push_string(&mut self, value: &str) -> Result<(), RfbError> {
        self.sq_push_bytes(value.as_bytes())
    }

    /// Append bytes, flushing first when the append would overflow the
    /// queue and growing the queue when a single append is larger than it.
    pub fn sq_push_bytes(&mut self, data: &[u8]) -> Result<(), RfbError> {
        if !self.sq.fits(data.len()) {
            self.flush()?;
            if !self.sq.fits(data.len()) {
                self.sq.grow_for(data.len());
            }
        }
        self.sq.push(data);
        Ok(())
    }

    /// Write the whole unsent buffer as one transport send. No-op when
    /// nothing is queued.
    pub fn flush(&mut self) -> Result<(), RfbError> {
        if self.sq.is_empty() {
            return Ok(());
        }
        let transport = self.transport.as_mut().ok_or(RfbError::TransportNotOpen)?;
        if transport.ready_state() != ReadyState::Open {
            return Err(RfbError::TransportNotOpen);
        }
        let buf = self.sq.drain();
        transport.send(&buf)
    }
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use bytes::Bytes;

    fn open_socket() -> (Socket, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        let mut sock = Socket::new();
        sock.attach(Box::new(transport.clone()));
        (sock, transport)
    }

    #[test]
    fn state_tracks_transport() {
        let mut sock = Socket::new();
        assert_eq!(sock.state(), SocketState::Unused);

        let (s2, transport) = open_socket();
        drop(s2);
        sock.attach(Box::new(transport.clone()));
        assert_eq!(sock.state(), SocketState::Open);

        transport.set_state(ReadyState::Closed);
        assert_eq!(sock.state(), SocketState::Closed);
    }

    #[test]
    fn message_event_queues_bytes_and_reports_data_ready() {
        let (mut sock, _t) = open_socket();
        let ev = sock.handle_event(TransportEvent::Message(Bytes::from_static(&[1, 2, 3])));
        assert_eq!(ev, Some(SocketEvent::DataReady));
        assert_eq!(sock.rq_shift_bytes(3), vec![1, 2, 3]);
    }

    #[test]
    fn empty_frame_is_swallowed() {
        let (mut sock, _t) = open_socket();
        let ev = sock.handle_event(TransportEvent::Message(Bytes::new()));
        assert_eq!(ev, None);
    }

    #[test]
    fn text_frames_are_base64_decoded() {
        let (mut sock, _t) = open_socket();
        let ev = sock.handle_event(TransportEvent::Text("AQID".into()));
        assert_eq!(ev, Some(SocketEvent::DataReady));
        assert_eq!(sock.rq_shift_bytes(3), vec![1, 2, 3]);
    }

    #[test]
    fn close_detaches_receive_processing_first() {
        let (mut sock, _t) = open_socket();
        sock.close();
        // A late frame from the old transport must not be queued.
        let ev = sock.handle_event(TransportEvent::Message(Bytes::from_static(&[1])));
        assert_eq!(ev, None);
        assert_eq!(sock.rq_len(), 0);
    }

    #[test]
    fn push_flush_roundtrip_is_big_endian_concatenation() {
        let (mut sock, transport) = open_socket();
        sock.sq_push8(0x01).unwrap();
        sock.sq_push16(0x0203).unwrap();
        sock.sq_push32(0x04050607).unwrap();
        sock.sq_push_string("hi").unwrap();
        sock.sq_push_bytes(&[0xff]).unwrap();
        assert!(transport.sent().is_empty());

        sock.flush().unwrap();
        assert_eq!(
            transport.sent(),
            vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, b'h', b'i', 0xff]
        );

        // Flushing again is a no-op.
        sock.flush().unwrap();
        assert_eq!(transport.sent().len(), 10);
    }

    #[test]
    fn oversized_push_auto_flushes_then_grows() {
        let (mut sock, transport) = open_socket();
        sock.sq_push8(0xaa).unwrap();
        let big = vec![0xbb; 64 * 1024];
        sock.sq_push_bytes(&big).unwrap();
        // The first byte was flushed on its own before the big append.
        assert_eq!(transport.sent(), vec![0xaa]);
        sock.flush().unwrap();
        assert_eq!(transport.sent().len(), 1 + big.len());
    }

    #[test]
    fn flush_without_transport_errors() {
        let mut sock = Socket::new();
        sock.sq_push8(1).unwrap();
        assert!(matches!(sock.flush(), Err(RfbError::TransportNotOpen)));
    }
}
