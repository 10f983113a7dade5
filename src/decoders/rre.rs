//! RRE encoding: a background fill plus a list of solid subrectangles.

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

pub struct RreDecoder {
    /// Subrectangles still owed by the current rectangle. Zero means the
    /// next invocation starts a fresh rectangle.
    subrects: u32,
}

impl RreDecoder {
    pub fn new() -> Self {
        Self { subrects: 0 }
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
        if self.subrects == 0 {
            if sock.rq_wait(4 + 4, 0) {
                return Ok(false);
            }

            self.subrects = sock.rq_shift32();

            let color = sock.rq_shift_bytes(4); // background
            display.fill_rect(x, y, width, height, [color[0], color[1], color[2]]);
        }

        // Resumes exactly where a previous invocation left off: the count
        // persists, never restarts.
        while self.subrects > 0 {
            if sock.rq_wait(4 + 8, 0) {
                return Ok(false);
            }

            let color = sock.rq_shift_bytes(4);
            let sx = sock.rq_shift16() as u32;
            let sy = sock.rq_shift16() as u32;
            let sw = sock.rq_shift16() as u32;
            let sh = sock.rq_shift16() as u32;
            display.fill_rect(x + sx, y + sy, sw, sh, [color[0], color[1], color[2]]);

            self.subrects -= 1;
        }

        Ok(true)
    }
}

impl Default for RreDecoder {
    fn default() -> Self {
        Self::new()
    }
}
