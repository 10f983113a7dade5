//! Framebuffer-update rectangle dispatch.
//!
//! A framebuffer update is a count of rectangles followed by, per
//! rectangle, a header (`u16 x, y, w, h` + `i32 encoding`) and the
//! encoding's payload. The engine reads headers, dispatches to the
//! registry's decoder for the encoding id, and only advances to the next
//! rectangle once `decode_rect` reports completion — decoder instances
//! are shared across rectangles and carry no concurrent-rectangle state,
//! so rectangles are strictly serialized in server order.

use crate::decoders::DecoderRegistry;
use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

/// One rectangle header from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectHeader {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub encoding: i32,
}

pub struct UpdateEngine {
    registry: DecoderRegistry,
    rects_remaining: u16,
    /// Header of the rectangle currently being decoded, if any.
    current: Option<RectHeader>,
}

impl UpdateEngine {
    pub fn new(registry: DecoderRegistry) -> Self {
        Self {
            registry,
            rects_remaining: 0,
            current: None,
        }
    }

    /// Begin a framebuffer update of `num_rects` rectangles.
    ///
    /// # Panics
    ///
    /// Panics if the previous update has not finished — the protocol
    /// never interleaves updates.
    pub fn begin_update(&mut self, num_rects: u16) {
        assert!(
            self.rects_remaining == 0 && self.current.is_none(),
            "framebuffer update already in progress"
        );
        self.rects_remaining = num_rects;
    }

    /// Whether an update is mid-flight.
    pub fn in_progress(&self) -> bool {
        self.rects_remaining > 0 || self.current.is_some()
    }

    /// Decode as many rectangles as the queued bytes allow. Returns
    /// `Ok(true)` once every rectangle of the update is done, `Ok(false)`
    /// when more bytes are needed — call again on new data.
    pub fn process(
        &mut self,
        sock: &mut Socket,
        display: &mut dyn Display,
        depth: u8,
    ) -> Result<bool, RfbError> {
        while self.rects_remaining > 0 {
            let header = match self.current {
                Some(header) => header,
                None => {
                    if sock.rq_wait(12, 0) {
                        return Ok(false);
                    }
                    let header = RectHeader {
                        x: sock.rq_shift16() as u32,
                        y: sock.rq_shift16() as u32,
                        width: sock.rq_shift16() as u32,
                        height: sock.rq_shift16() as u32,
                        encoding: sock.rq_shift32() as i32,
                    };
                    self.current = Some(header);
                    header
                }
            };

            let decoder = self
                .registry
                .get_mut(header.encoding)
                .ok_or(RfbError::UnsupportedEncoding(header.encoding))?;

            let done = decoder.decode_rect(
                header.x,
                header.y,
                header.width,
                header.height,
                sock,
                display,
                depth,
            )?;
            if !done {
                return Ok(false);
            }

            self.current = None;
            self.rects_remaining -= 1;
        }

        Ok(true)
    }
}

// ── Tests ────────────────────────────────────────────────────────
