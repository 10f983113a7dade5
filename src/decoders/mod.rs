//! Rectangle decoders, one stateful instance per encoding type.
//!
//! ## The `decode_rect` contract
//!
//! Every decoder exposes
//! `decode_rect(x, y, width, height, sock, display, depth)`:
//!
//! - `Ok(false)` — more bytes are required than are currently queued. The
//!   caller MUST re-invoke the same call with the same arguments once new
//!   data arrives; it must not skip or advance. Any bytes already consumed
//!   are accounted for in the decoder's own resumable state.
//! - `Ok(true)` — the rectangle is fully consumed and drawn, and internal
//!   partial-rectangle state has been reset for the next invocation.
//! - `Err(_)` — structurally invalid input (illegal subencoding, corrupt
//!   markers). Fatal: the connection terminates, nothing is retried.
//!
//! Instances live for the whole connection, not per rectangle, because
//! several encodings carry cross-rectangle state (zlib history windows,
//! cached JPEG tables, video decode contexts).

pub mod copyrect;
pub mod h264;
pub mod hextile;
pub mod jpeg;
pub mod raw;
pub mod rre;
pub mod tight;
pub mod tightpng;
pub mod zrle;

use std::collections::HashMap;

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;
use crate::video::VideoBackendFactory;

pub use copyrect::CopyRectDecoder;
pub use h264::H264Decoder;
pub use hextile::HextileDecoder;
pub use jpeg::JpegDecoder;
pub use raw::RawDecoder;
pub use rre::RreDecoder;
pub use tight::TightDecoder;
pub use tightpng::TightPngDecoder;
pub use zrle::ZrleDecoder;

// ── Encoding ids ─────────────────────────────────────────────────

pub const ENCODING_RAW: i32 = 0;
pub const ENCODING_COPY_RECT: i32 = 1;
pub const ENCODING_RRE: i32 = 2;
pub const ENCODING_HEXTILE: i32 = 5;
pub const ENCODING_TIGHT: i32 = 7;
pub const ENCODING_ZRLE: i32 = 16;
pub const ENCODING_JPEG: i32 = 21;
pub const ENCODING_H264: i32 = 50;
pub const ENCODING_TIGHT_PNG: i32 = -260;

// ── Decoder ──────────────────────────────────────────────────────

/// Tagged union over the decoder family.
pub enum Decoder {
    Raw(RawDecoder),
    CopyRect(CopyRectDecoder),
    Rre(RreDecoder),
    Hextile(HextileDecoder),
    Tight(TightDecoder),
    TightPng(TightPngDecoder),
    Zrle(ZrleDecoder),
    Jpeg(JpegDecoder),
    H264(H264Decoder),
}

impl Decoder {
    #[allow(clippy::too_many_arguments)]
    pub fn decode_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
        depth: u8,
    ) -> Result<bool, RfbError> {
        match self {
            Decoder::Raw(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::CopyRect(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::Rre(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::Hextile(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::Tight(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::TightPng(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::Zrle(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::Jpeg(d) => d.decode_rect(x, y, width, height, sock, display, depth),
            Decoder::H264(d) => d.decode_rect(x, y, width, height, sock, display, depth),
        }
    }
}

// ── DecoderRegistry ──────────────────────────────────────────────

/// Maps encoding ids to their single per-connection decoder instance.
pub struct DecoderRegistry {
    decoders: HashMap<i32, Decoder>,
}

impl DecoderRegistry {
    /// Build the full decoder set. `video` constructs one backend per
    /// H.264 decode context.
    pub fn new(video: VideoBackendFactory) -> Self {
        let mut decoders = HashMap::new();
        decoders.insert(ENCODING_RAW, Decoder::Raw(RawDecoder::new()));
        decoders.insert(ENCODING_COPY_RECT, Decoder::CopyRect(CopyRectDecoder::new()));
        decoders.insert(ENCODING_RRE, Decoder::Rre(RreDecoder::new()));
        decoders.insert(ENCODING_HEXTILE, Decoder::Hextile(HextileDecoder::new()));
        decoders.insert(ENCODING_TIGHT, Decoder::Tight(TightDecoder::new()));
        decoders.insert(
            ENCODING_TIGHT_PNG,
            Decoder::TightPng(TightPngDecoder::new()),
        );
        decoders.insert(ENCODING_ZRLE, Decoder::Zrle(ZrleDecoder::new()));
        decoders.insert(ENCODING_JPEG, Decoder::Jpeg(JpegDecoder::new()));
        decoders.insert(ENCODING_H264, Decoder::H264(H264Decoder::new(video)));
        Self { decoders }
    }

    /// Look up the decoder for an encoding id.
    pub fn get_mut(&mut self, encoding: i32) -> Option<&mut Decoder> {
        self.decoders.get_mut(&encoding)
    }
}
