//! CopyRect encoding: the rectangle's pixels already exist elsewhere on
//! the framebuffer; the wire carries only the source position.

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

pub struct CopyRectDecoder;

impl CopyRectDecoder {
    pub fn new() -> Self {
        Self
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
        if sock.rq_wait(4, 0) {
            return Ok(false);
        }

        let src_x = sock.rq_shift16() as u32;
        let src_y = sock.rq_shift16() as u32;

        // A degenerate rectangle still carries its source position on the
        // wire, but there is nothing to copy.
        if width == 0 || height == 0 {
            return Ok(true);
        }

        display.copy_image(src_x, src_y, x, y, width, height);

        Ok(true)
    }
}

impl Default for CopyRectDecoder {
    fn default() -> Self {
        Self::new()
    }
}
