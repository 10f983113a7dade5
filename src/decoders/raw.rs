//! Raw encoding: uncompressed pixels, top to bottom.
//!
//! Large raw rectangles routinely straddle many transport frames, so the
//! decoder blits whatever whole lines are available and remembers how many
//! are still owed.

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

pub struct RawDecoder {
    /// Lines of the current rectangle not yet drawn; zero between rects.
    lines: u32,
}

impl RawDecoder {
    pub fn new() -> Self {
        Self { lines: 0 }
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
        if width == 0 || height == 0 {
            return Ok(true);
        }

        if self.lines == 0 {
            self.lines = height;
        }

        let pixel_size = if depth == 8 { 1usize } else { 4 };
        let bytes_per_line = width as usize * pixel_size;

        if sock.rq_wait(bytes_per_line, 0) {
            return Ok(false);
        }

        let cur_y = y + (height - self.lines);
        let curr_height = (self.lines as usize).min(sock.rq_len() / bytes_per_line) as u32;
        let pixels = width as usize * curr_height as usize;

        if depth == 8 {
            // BGR233 -> RGBX.
            let packed = sock.rq_shift_bytes(pixels);
            let mut data = vec![0u8; pixels * 4];
            for (i, &p) in packed.iter().enumerate() {
                data[i * 4] = ((p as u32 & 0x3) * 255 / 3) as u8;
                data[i * 4 + 1] = (((p as u32 >> 2) & 0x3) * 255 / 3) as u8;
                data[i * 4 + 2] = (((p as u32 >> 4) & 0x3) * 255 / 3) as u8;
                data[i * 4 + 3] = 255;
            }
            display.blit_image(x, cur_y, width, curr_height, &data, 0);
        } else {
            let data = sock.rq_shift_bytes_mut(curr_height as usize * bytes_per_line);
            // The server sends don't-care alpha; force full opacity.
            for i in 0..pixels {
                data[i * 4 + 3] = 255;
            }
            display.blit_image(x, cur_y, width, curr_height, data, 0);
        }

        self.lines -= curr_height;
        Ok(self.lines == 0)
    }
}

impl Default for RawDecoder {
    fn default() -> Self {
        Self::new()
    }
}
