//! TightPNG encoding: the Tight control-byte dispatch with PNG replacing
//! Basic compression entirely. PNG rectangles are handed to the display
//! layer undecoded; receiving Basic mode is a protocol error.

use crate::decoders::tight::TightDecoder;
use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

pub struct TightPngDecoder {
    inner: TightDecoder,
}

impl TightPngDecoder {
    pub fn new() -> Self {
        Self {
            inner: TightDecoder::new_png(),
        }
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
        depth: u8,
    ) -> Result<bool, RfbError> {
        self.inner.decode_rect(x, y, width, height, sock, display, depth)
    }
}

impl Default for TightPngDecoder {
    fn default() -> Self {
        Self::new()
    }
}
