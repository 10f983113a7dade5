//! Hextile encoding: the rectangle is tiled into 16x16 blocks, row-major,
//! each tile carrying its own subencoding byte.

use bitflags::bitflags;
use tracing::debug;

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

bitflags! {
    /// Per-tile subencoding bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Subencoding: u8 {
        const RAW               = 0x01;
        const BACKGROUND        = 0x02;
        const FOREGROUND        = 0x04;
        const ANY_SUBRECTS      = 0x08;
        const SUBRECTS_COLOURED = 0x10;
    }
}

pub struct HextileDecoder {
    /// Tiles still owed by the current rectangle; zero between rects.
    tiles: u32,
    /// Subencoding of the previously decoded tile, for the blank-tile rule.
    last_subencoding: u8,
    tiles_x: u32,
    total_tiles: u32,
    background: [u8; 4],
    foreground: [u8; 4],
    /// Scratch tile being assembled (16*16 RGBA max).
    tile_buffer: [u8; 16 * 16 * 4],
    tile_x: u32,
    tile_y: u32,
    tile_w: u32,
    tile_h: u32,
}

impl HextileDecoder {
    pub fn new() -> Self {
        Self {
            tiles: 0,
            last_subencoding: 0,
            tiles_x: 0,
            total_tiles: 0,
            background: [0; 4],
            foreground: [0; 4],
            tile_buffer: [0; 16 * 16 * 4],
            tile_x: 0,
            tile_y: 0,
            tile_w: 0,
            tile_h: 0,
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
        _depth: u8,
    ) -> Result<bool, RfbError> {
        if self.tiles == 0 {
            self.tiles_x = width.div_ceil(16);
            let tiles_y = height.div_ceil(16);
            self.total_tiles = self.tiles_x * tiles_y;
            self.tiles = self.total_tiles;
        }

        while self.tiles > 0 {
            let mut bytes = 1usize;

            if sock.rq_wait(bytes, 0) {
                return Ok(false);
            }

            let raw_subencoding = sock.rq_peek8();
            if raw_subencoding > 30 {
                return Err(RfbError::IllegalControlByte {
                    context: "hextile subencoding",
                    value: raw_subencoding,
                });
            }
            let subencoding = Subencoding::from_bits_truncate(raw_subencoding);

            let curr_tile = self.total_tiles - self.tiles;
            let tile_x = curr_tile % self.tiles_x;
            let tile_y = curr_tile / self.tiles_x;
            let tx = x + tile_x * 16;
            let ty = y + tile_y * 16;
            let tw = 16.min(x + width - tx);
            let th = 16.min(y + height - ty);

            // Work out how many bytes this whole tile needs before
            // consuming anything, so a partial tile leaves the queue
            // positioned at its subencoding byte.
            if subencoding.contains(Subencoding::RAW) {
                bytes += (tw * th * 4) as usize;
            } else {
                if subencoding.contains(Subencoding::BACKGROUND) {
                    bytes += 4;
                }
                if subencoding.contains(Subencoding::FOREGROUND) {
                    bytes += 4;
                }
                if subencoding.contains(Subencoding::ANY_SUBRECTS) {
                    bytes += 1; // the count byte, not yet shifted off

                    if sock.rq_wait(bytes, 0) {
                        return Ok(false);
                    }

                    let subrects = sock.rq_peek_bytes(bytes)[bytes - 1] as usize;
                    if subencoding.contains(Subencoding::SUBRECTS_COLOURED) {
                        bytes += subrects * (4 + 2);
                    } else {
                        bytes += subrects * 2;
                    }
                }
            }

            if sock.rq_wait(bytes, 0) {
                return Ok(false);
            }

            // We know the encoding and have a whole tile.
            sock.rq_shift8();
            if raw_subencoding == 0 {
                if (self.last_subencoding & Subencoding::RAW.bits()) != 0 {
                    // Weird: ignore blanks after RAW.
                    debug!("ignoring blank hextile after raw tile");
                } else {
                    display.fill_rect(
                        tx,
                        ty,
                        tw,
                        th,
                        [self.background[0], self.background[1], self.background[2]],
                    );
                }
            } else if subencoding.contains(Subencoding::RAW) {
                let pixels = (tw * th) as usize;
                let data = sock.rq_shift_bytes_mut(pixels * 4);
                // Make sure the image is fully opaque.
                for i in 0..pixels {
                    data[i * 4 + 3] = 255;
                }
                display.blit_image(tx, ty, tw, th, data, 0);
            } else {
                if subencoding.contains(Subencoding::BACKGROUND) {
                    sock.rq_shift_into(&mut self.background);
                }
                if subencoding.contains(Subencoding::FOREGROUND) {
                    sock.rq_shift_into(&mut self.foreground);
                }

                self.start_tile(tx, ty, tw, th);
                if subencoding.contains(Subencoding::ANY_SUBRECTS) {
                    let subrects = sock.rq_shift8();

                    for _ in 0..subrects {
                        let color = if subencoding.contains(Subencoding::SUBRECTS_COLOURED) {
                            let mut c = [0u8; 4];
                            sock.rq_shift_into(&mut c);
                            c
                        } else {
                            self.foreground
                        };

                        // Position and size are packed as nibbles; sizes
                        // are stored minus one.
                        let xy = sock.rq_shift8() as u32;
                        let sx = xy >> 4;
                        let sy = xy & 0x0f;

                        let wh = sock.rq_shift8() as u32;
                        let sw = (wh >> 4) + 1;
                        let sh = (wh & 0x0f) + 1;

                        self.sub_tile(sx, sy, sw, sh, color);
                    }
                }
                self.finish_tile(display);
            }
            self.last_subencoding = raw_subencoding;
            self.tiles -= 1;
        }

        Ok(true)
    }

    /// Start a tile: flood the scratch buffer with `self.background`.
    fn start_tile(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.tile_x = x;
        self.tile_y = y;
        self.tile_w = width;
        self.tile_h = height;

        let [red, green, blue, _] = self.background;
        for i in (0..(width * height * 4) as usize).step_by(4) {
            self.tile_buffer[i] = red;
            self.tile_buffer[i + 1] = green;
            self.tile_buffer[i + 2] = blue;
            self.tile_buffer[i + 3] = 255;
        }
    }

    /// Paint one subrectangle of the current tile.
    fn sub_tile(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 4]) {
        let [red, green, blue, _] = color;
        let width = self.tile_w;
        for j in y..y + h {
            for i in x..x + w {
                let p = ((i + j * width) * 4) as usize;
                self.tile_buffer[p] = red;
                self.tile_buffer[p + 1] = green;
                self.tile_buffer[p + 2] = blue;
                self.tile_buffer[p + 3] = 255;
            }
        }
    }

    /// Blit the finished tile.
    fn finish_tile(&mut self, display: &mut dyn Display) {
        display.blit_image(
            self.tile_x,
            self.tile_y,
            self.tile_w,
            self.tile_h,
            &self.tile_buffer[..(self.tile_w * self.tile_h * 4) as usize],
            0,
        );
    }
}

impl Default for HextileDecoder {
    fn default() -> Self {
        Self::new()
    }
}
