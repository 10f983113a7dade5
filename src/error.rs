//! Domain-specific error types for the RFB client core.
//!
//! "Not enough data yet" is deliberately **not** represented here: every
//! resumable operation reports it through its normal return value
//! (`Ok(false)` from decoders, a pending status from the handshake) and the
//! caller retries once more bytes arrive. `RfbError` covers the fatal
//! categories only — a raised error terminates the connection.

use thiserror::Error;

/// The canonical error type for the RFB protocol core.
#[derive(Debug, Error)]
pub enum RfbError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A control or subencoding byte had an illegal value.
    #[error("illegal {context} (value: {value:#04x})")]
    IllegalControlByte { context: &'static str, value: u8 },

    /// A rectangle header referenced an encoding we have no decoder for.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(i32),

    /// The peer violated the protocol in some other structural way.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // ── Compression Errors ───────────────────────────────────────
    /// The persistent zlib stream reported an error code.
    #[error("zlib error: {0}")]
    Zlib(String),

    // ── Authentication Errors ────────────────────────────────────
    /// The advertised RSA modulus length is outside sane bounds.
    ///
    /// Checked before any buffer is sized from the field.
    #[error("server public key length {0} outside 1024..=8192 bits")]
    BadServerKeyLength(u32),

    /// An AEAD message failed to authenticate, or an exchanged hash or
    /// random did not match. Distinct from [`RfbError::ProtocolViolation`]:
    /// the bytes parsed, but could not be trusted.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// An RSA operation failed (corrupt ciphertext, bad key material).
    #[error("rsa error: {0}")]
    Rsa(String),

    // ── Video Errors ─────────────────────────────────────────────
    /// The external video decoder reported a failure it cannot recover from.
    #[error("video decode error: {0}")]
    Video(String),

    /// A decoded frame came back out of submission order.
    #[error("video frame timestamp mismatch: expected {expected}, got {actual}")]
    FrameOutOfOrder { expected: u64, actual: u64 },

    // ── Connection Errors ────────────────────────────────────────
    /// The underlying transport or I/O layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A write was attempted while no transport is attached and open.
    #[error("transport is not open")]
    TransportNotOpen,

    /// A transport task channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The connection was torn down while an operation was suspended.
    #[error("disconnected")]
    Disconnected,

    // ── Other ────────────────────────────────────────────────────
    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RfbError {
    fn from(s: String) -> Self {
        RfbError::Other(s)
    }
}

impl From<&str> for RfbError {
    fn from(s: &str) -> Self {
        RfbError::Other(s.to_string())
    }
}

impl From<rsa::Error> for RfbError {
    fn from(e: rsa::Error) -> Self {
        RfbError::Rsa(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RfbError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RfbError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RfbError::IllegalControlByte {
            context: "tight compression-control",
            value: 0x0b,
        };
        assert!(e.to_string().contains("0x0b"));

        let e = RfbError::FrameOutOfOrder {
            expected: 3,
            actual: 7,
        };
        assert!(e.to_string().contains("3"));
        assert!(e.to_string().contains("7"));
    }

    #[test]
    fn from_string() {
        let e: RfbError = "something broke".into();
        assert!(matches!(e, RfbError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RfbError = io_err.into();
        assert!(matches!(e, RfbError::Connection(_)));
    }
}
