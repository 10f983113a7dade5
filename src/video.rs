//! Seam to the external bulk video decoder.
//!
//! The H.264 rectangle decoder parses the wire format and manages decode
//! contexts, but the actual transform from access units to pixels happens
//! in an opaque backend (hardware decoder, software codec, test double).
//! Submission is asynchronous: each submitted chunk eventually produces
//! one output frame, in strict submission order.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::RfbError;

// ── Backend types ────────────────────────────────────────────────

/// Codec parameters extracted from the stream's SPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoConfig {
    pub profile_idc: u8,
    pub constraint_set: u8,
    pub level_idc: u8,
    pub coded_width: u32,
    pub coded_height: u32,
}

/// One encoded access unit handed to the backend.
#[derive(Debug)]
pub struct EncodedChunk<'a> {
    pub timestamp: u64,
    pub key: bool,
    pub data: &'a [u8],
}

/// A frame the backend finished decoding.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub timestamp: u64,
    /// Backend-defined frame payload (decoded pixels or a handle).
    pub data: Bytes,
}

/// External decoder interface.
///
/// Backends surface unrecoverable codec failures through `Err`; a corrupted
/// video stream cannot be repaired locally, so those propagate as fatal.
pub trait VideoBackend: Send {
    /// (Re)configure for the given codec parameters. May be called again
    /// when the stream's SPS changes.
    fn configure(&mut self, config: &VideoConfig) -> Result<(), RfbError>;

    /// Whether a configuration has been applied.
    fn configured(&self) -> bool;

    /// Submit one access unit for asynchronous decoding.
    fn submit(&mut self, chunk: EncodedChunk<'_>) -> Result<(), RfbError>;

    /// Drain frames finished since the last poll, in submission order.
    fn poll(&mut self) -> Result<Vec<VideoFrame>, RfbError>;
}

/// Constructor for per-region backends; each decode context gets its own.
pub type VideoBackendFactory = Box<dyn FnMut() -> Box<dyn VideoBackend> + Send>;

// ── PendingFrame ─────────────────────────────────────────────────

/// Completion slot for one submitted access unit.
///
/// The decoder fills the slot when the backend reports the frame; the
/// display consumer checks [`PendingFrameState::ready`] before touching
/// the pixels. Within one payload only the final frame is kept for
/// display — earlier intra-payload frames are discarded once decoded.
pub type PendingFrame = Arc<Mutex<PendingFrameState>>;

#[derive(Debug, Default)]
pub struct PendingFrameState {
    pub timestamp: u64,
    pub ready: bool,
    /// Whether the decoded frame should be retained for display.
    pub keep: bool,
    pub frame: Option<VideoFrame>,
}

/// Fresh, unresolved slot for the given timestamp.
pub fn pending_frame(timestamp: u64) -> PendingFrame {
    Arc::new(Mutex::new(PendingFrameState {
        timestamp,
        ..Default::default()
    }))
}
