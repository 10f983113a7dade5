//! H.264 encoding: Annex-B access units in a length+flags-framed payload.
//!
//! Servers may multiplex several independent video regions, so decode
//! state is kept per exact `(x, y, w, h)` tuple, capped at 64 concurrent
//! contexts with least-recently-used eviction. Frames that arrive before
//! an SPS and a key frame have been seen are dropped with a warning — the
//! stream becomes decodable later, so this is not an error.

use std::collections::HashMap;
use std::collections::VecDeque;

use bitflags::bitflags;
use tracing::warn;

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;
use crate::video::{
    EncodedChunk, PendingFrame, VideoBackend, VideoBackendFactory, VideoConfig, pending_frame,
};

bitflags! {
    /// Flags in the rectangle header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RectFlags: u32 {
        const RESET_CONTEXT      = 0x01;
        const RESET_ALL_CONTEXTS = 0x02;
    }
}

const MAX_CONTEXTS: usize = 64;

// ── H264Parser ───────────────────────────────────────────────────

/// Splits an Annex-B byte stream into frames at slice boundaries and
/// captures SPS parameters along the way.
pub struct H264Parser<'a> {
    data: &'a [u8],
    index: usize,
    pub profile_idc: Option<u8>,
    pub constraint_set: Option<u8>,
    pub level_idc: Option<u8>,
}

struct NalUnitInfo {
    slice: bool,
    key: bool,
}

pub struct ParsedFrame<'a> {
    pub frame: &'a [u8],
    pub key: bool,
}

impl<'a> H264Parser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            index: 0,
            profile_idc: None,
            constraint_set: None,
            level_idc: None,
        }
    }

    /// Length of the start code at `index`: 4, 3, or 0 when absent.
    fn start_sequence_len(&self, index: usize) -> usize {
        let data = self.data;
        if data.len() >= index + 4 && data[index..index + 4] == [0, 0, 0, 1] {
            return 4;
        }
        if data.len() >= index + 3 && data[index..index + 3] == [0, 0, 1] {
            return 3;
        }
        0
    }

    fn index_of_next_nal_unit(&self, index: usize) -> Option<usize> {
        (index..self.data.len()).find(|&i| self.start_sequence_len(i) != 0)
    }

    fn parse_sps(&mut self, index: usize) {
        self.profile_idc = self.data.get(index).copied();
        self.constraint_set = self.data.get(index + 1).copied();
        self.level_idc = self.data.get(index + 2).copied();
    }

    fn parse_nal_unit(&mut self, index: usize) -> Result<NalUnitInfo, RfbError> {
        let first_byte = self.data[index];
        if first_byte & 0x80 != 0 {
            return Err(RfbError::ProtocolViolation(
                "forbidden zero bit set in NAL unit".into(),
            ));
        }
        let unit_type = first_byte & 0x1f;

        let info = match unit_type {
            1 => NalUnitInfo { slice: true, key: false }, // coded slice, non-idr
            5 => NalUnitInfo { slice: true, key: true },  // coded slice, idr
            6 => NalUnitInfo { slice: false, key: false }, // sei
            7 => {
                self.parse_sps(index + 1);
                NalUnitInfo { slice: false, key: false }
            }
            8 => NalUnitInfo { slice: false, key: false }, // pps
            other => {
                warn!(unit_type = other, "unhandled NAL unit type");
                NalUnitInfo { slice: false, key: false }
            }
        };
        Ok(info)
    }

    /// Next frame (everything up to and including the next slice NAL),
    /// or `None` when the payload is exhausted.
    pub fn parse(&mut self) -> Result<Option<ParsedFrame<'a>>, RfbError> {
        let start_index = self.index;
        let mut is_key = false;

        while self.index < self.data.len() {
            let start_sequence_len = self.start_sequence_len(self.index);
            if start_sequence_len == 0 {
                return Err(RfbError::ProtocolViolation(
                    "invalid start sequence in H.264 bit stream".into(),
                ));
            }

            let info = self.parse_nal_unit(self.index + start_sequence_len)?;

            self.index = self
                .index_of_next_nal_unit(self.index + start_sequence_len)
                .unwrap_or(self.data.len());

            if info.key {
                is_key = true;
            }
            if info.slice {
                break;
            }
        }

        if start_index == self.index {
            return Ok(None);
        }

        Ok(Some(ParsedFrame {
            frame: &self.data[start_index..self.index],
            key: is_key,
        }))
    }
}

// ── H264Context ──────────────────────────────────────────────────

/// Decode state for one video region.
pub struct H264Context {
    /// Recency tick for LRU eviction.
    pub last_used: u64,
    width: u32,
    height: u32,
    profile_idc: Option<u8>,
    constraint_set: Option<u8>,
    level_idc: Option<u8>,
    backend: Box<dyn VideoBackend>,
    /// Completion slots in strict submission order.
    pending_frames: VecDeque<PendingFrame>,
    /// Timestamp source: one tick per submitted payload.
    next_timestamp: u64,
}

impl H264Context {
    fn new(width: u32, height: u32, backend: Box<dyn VideoBackend>) -> Self {
        Self {
            last_used: 0,
            width,
            height,
            profile_idc: None,
            constraint_set: None,
            level_idc: None,
            backend,
            pending_frames: VecDeque::new(),
            next_timestamp: 0,
        }
    }

    fn configure_backend(&mut self) -> Result<(), RfbError> {
        // parse() captured these before we got here; absent SPS means the
        // caller skipped configuration.
        let config = VideoConfig {
            profile_idc: self.profile_idc.unwrap_or(0),
            constraint_set: self.constraint_set.unwrap_or(0),
            level_idc: self.level_idc.unwrap_or(0),
            coded_width: self.width,
            coded_height: self.height,
        };
        self.backend.configure(&config)
    }

    /// Decode one payload's access units. Returns the completion slot of
    /// the payload's final frame — the only one retained for display.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Option<PendingFrame>, RfbError> {
        let mut parser = H264Parser::new(payload);
        let mut result: Option<PendingFrame> = None;

        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;

        while let Some(encoded) = parser.parse()? {
            if parser.profile_idc.is_some() {
                self.profile_idc = parser.profile_idc;
                self.constraint_set = parser.constraint_set;
                self.level_idc = parser.level_idc;
            }

            if !self.backend.configured() {
                if !encoded.key {
                    warn!("missing key frame, cannot decode until one arrives");
                    continue;
                }
                if self.profile_idc.is_none() {
                    warn!("cannot configure video decoder before SPS arrives");
                    continue;
                }
                self.configure_backend()?;
            }

            let pending = pending_frame(timestamp);
            self.pending_frames.push_back(pending.clone());
            result = Some(pending);

            self.backend.submit(EncodedChunk {
                timestamp,
                key: encoded.key,
                data: encoded.frame,
            })?;
        }

        // Only the last frame of each payload is kept; earlier ones are
        // discarded as soon as they are decoded.
        if let Some(result) = &result {
            if let Ok(mut state) = result.lock() {
                state.keep = true;
            }
        }

        self.pump()?;
        Ok(result)
    }

    /// Match finished backend frames against the pending FIFO.
    pub fn pump(&mut self) -> Result<(), RfbError> {
        for frame in self.backend.poll()? {
            let pending = self.pending_frames.pop_front().ok_or_else(|| {
                RfbError::Video("pending frame queue empty when receiving frame".into())
            })?;
            let mut state = pending
                .lock()
                .map_err(|_| RfbError::Video("pending frame lock poisoned".into()))?;
            if state.timestamp != frame.timestamp {
                return Err(RfbError::FrameOutOfOrder {
                    expected: state.timestamp,
                    actual: frame.timestamp,
                });
            }
            state.ready = true;
            if state.keep {
                state.frame = Some(frame);
            }
        }
        Ok(())
    }
}

// ── H264Decoder ──────────────────────────────────────────────────

type RegionKey = (u32, u32, u32, u32);

pub struct H264Decoder {
    tick: u64,
    contexts: HashMap<RegionKey, H264Context>,
    /// Insertion order, for a deterministic tie-break on eviction.
    insertion_seq: HashMap<RegionKey, u64>,
    next_seq: u64,
    backend_factory: VideoBackendFactory,
}

impl H264Decoder {
    pub fn new(backend_factory: VideoBackendFactory) -> Self {
        Self {
            tick: 0,
            contexts: HashMap::new(),
            insertion_seq: HashMap::new(),
            next_seq: 0,
            backend_factory,
        }
    }

    fn find_oldest_context(&self) -> Option<RegionKey> {
        self.contexts
            .iter()
            .min_by_key(|(key, ctx)| (ctx.last_used, self.insertion_seq.get(key).copied()))
            .map(|(key, _)| *key)
    }

    fn get_or_create_context(&mut self, key: RegionKey) -> &mut H264Context {
        if !self.contexts.contains_key(&key) {
            if self.contexts.len() >= MAX_CONTEXTS {
                if let Some(oldest) = self.find_oldest_context() {
                    self.contexts.remove(&oldest);
                    self.insertion_seq.remove(&oldest);
                }
            }
            let (_, _, width, height) = key;
            let backend = (self.backend_factory)();
            self.contexts
                .insert(key, H264Context::new(width, height, backend));
            self.insertion_seq.insert(key, self.next_seq);
            self.next_seq += 1;
        }
        self.contexts.get_mut(&key).expect("context just ensured")
    }

    fn reset_context(&mut self, key: RegionKey) {
        self.contexts.remove(&key);
        self.insertion_seq.remove(&key);
    }

    fn reset_all_contexts(&mut self) {
        self.contexts.clear();
        self.insertion_seq.clear();
    }

    /// Drive completion delivery for all contexts (for backends that
    /// finish frames asynchronously between rectangles).
    pub fn pump(&mut self) -> Result<(), RfbError> {
        for context in self.contexts.values_mut() {
            context.pump()?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decode_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
        _depth: u8,
    ) -> Result<bool, RfbError> {
        if sock.rq_wait(8, 0) {
            return Ok(false);
        }

        let length = sock.rq_shift32() as usize;
        let flags = RectFlags::from_bits_truncate(sock.rq_shift32());

        if sock.rq_wait(length, 8) {
            return Ok(false);
        }

        let key = (x, y, width, height);
        if flags.contains(RectFlags::RESET_ALL_CONTEXTS) {
            self.reset_all_contexts();
        } else if flags.contains(RectFlags::RESET_CONTEXT) {
            self.reset_context(key);
        }

        let tick = self.tick;
        self.tick += 1;
        let context = self.get_or_create_context(key);
        context.last_used = tick;

        if length != 0 {
            let payload = sock.rq_shift_bytes(length);
            if let Some(frame) = context.decode(&payload)? {
                display.video_frame(x, y, width, height, frame);
            }
        }

        Ok(true)
    }

    #[cfg(test)]
    fn context_count(&self) -> usize {
        self.contexts.len()
    }

    #[cfg(test)]
    fn has_context(&self, key: RegionKey) -> bool {
        self.contexts.contains_key(&key)
    }
}

// ── Tests ────────────────────────────────────────────────────────
