//! ZRLE encoding: one zlib-compressed blob per rectangle, decoded into
//! 64x64 tiles whose subencoding selects raw, solid, packed-palette or
//! run-length data.
//!
//! The zlib stream persists across rectangles — a single [`Inflator`]
//! lives for the whole connection.

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;
use crate::zlib::Inflator;

const TILE_WIDTH: u32 = 64;
const TILE_HEIGHT: u32 = 64;

pub struct ZrleDecoder {
    /// Pending compressed-blob length; zero between rectangles.
    length: usize,
    inflator: Inflator,
    pixel_buffer: Vec<u8>,
    tile_buffer: Vec<u8>,
}

impl ZrleDecoder {
    pub fn new() -> Self {
        Self {
            length: 0,
            inflator: Inflator::new(),
            pixel_buffer: vec![0; (TILE_WIDTH * TILE_HEIGHT * 4) as usize],
            tile_buffer: vec![0; (TILE_WIDTH * TILE_HEIGHT * 4) as usize],
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
        if self.length == 0 {
            if sock.rq_wait(4, 0) {
                return Ok(false);
            }
            self.length = sock.rq_shift32() as usize;
        }
        if sock.rq_wait(self.length, 0) {
            return Ok(false);
        }

        let data = sock.rq_shift_bytes(self.length);
        self.inflator.set_input(Some(&data));

        let Self {
            inflator,
            pixel_buffer,
            tile_buffer,
            ..
        } = self;

        let mut ty = y;
        while ty < y + height {
            let th = TILE_HEIGHT.min(y + height - ty);

            let mut tx = x;
            while tx < x + width {
                let tw = TILE_WIDTH.min(x + width - tx);
                let tile_size = (tw * th) as usize;

                let subencoding = inflate_u8(inflator)?;
                match subencoding {
                    0 => {
                        // Raw pixels.
                        read_pixels(inflator, pixel_buffer, tile_size)?;
                        display.blit_image(tx, ty, tw, th, &pixel_buffer[..tile_size * 4], 0);
                    }
                    1 => {
                        // Solid tile.
                        read_pixels(inflator, pixel_buffer, 1)?;
                        display.fill_rect(
                            tx,
                            ty,
                            tw,
                            th,
                            [pixel_buffer[0], pixel_buffer[1], pixel_buffer[2]],
                        );
                    }
                    2..=16 => {
                        decode_palette_tile(
                            inflator,
                            pixel_buffer,
                            tile_buffer,
                            subencoding as usize,
                            tw as usize,
                            th as usize,
                        )?;
                        display.blit_image(tx, ty, tw, th, &tile_buffer[..tile_size * 4], 0);
                    }
                    128 => {
                        decode_rle_tile(inflator, pixel_buffer, tile_buffer, tile_size)?;
                        display.blit_image(tx, ty, tw, th, &tile_buffer[..tile_size * 4], 0);
                    }
                    130..=255 => {
                        decode_rle_palette_tile(
                            inflator,
                            pixel_buffer,
                            tile_buffer,
                            subencoding as usize - 128,
                            tile_size,
                        )?;
                        display.blit_image(tx, ty, tw, th, &tile_buffer[..tile_size * 4], 0);
                    }
                    _ => {
                        return Err(RfbError::IllegalControlByte {
                            context: "zrle subencoding",
                            value: subencoding,
                        });
                    }
                }

                tx += TILE_WIDTH;
            }
            ty += TILE_HEIGHT;
        }

        self.length = 0;
        Ok(true)
    }
}

impl Default for ZrleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tile helpers ─────────────────────────────────────────────────

fn inflate_u8(inflator: &mut Inflator) -> Result<u8, RfbError> {
    Ok(inflator.inflate(1)?[0])
}

fn bits_per_pixel_in_palette(palette_size: usize) -> usize {
    if palette_size <= 2 {
        1
    } else if palette_size <= 4 {
        2
    } else {
        4
    }
}

/// Inflate `pixels` CPIXELs (3 bytes each) into `out` as opaque RGBA.
fn read_pixels(inflator: &mut Inflator, out: &mut [u8], pixels: usize) -> Result<(), RfbError> {
    let buffer = inflator.inflate(3 * pixels)?;
    for (px, src) in out[..pixels * 4]
        .chunks_exact_mut(4)
        .zip(buffer.chunks_exact(3))
    {
        px[0] = src[0];
        px[1] = src[1];
        px[2] = src[2];
        px[3] = 255;
    }
    Ok(())
}

/// Packed-palette tile: indices at 1/2/4 bits per pixel, rows aligned to
/// byte boundaries.
fn decode_palette_tile(
    inflator: &mut Inflator,
    palette_buffer: &mut [u8],
    out: &mut [u8],
    palette_size: usize,
    tile_w: usize,
    tile_h: usize,
) -> Result<(), RfbError> {
    read_pixels(inflator, palette_buffer, palette_size)?;
    let bits_per_pixel = bits_per_pixel_in_palette(palette_size);
    let mask = (1usize << bits_per_pixel) - 1;

    let mut offset = 0usize;
    let mut encoded = inflate_u8(inflator)? as usize;

    for row in 0..tile_h {
        let mut shift = 8 - bits_per_pixel as isize;
        for _ in 0..tile_w {
            if shift < 0 {
                shift = 8 - bits_per_pixel as isize;
                encoded = inflate_u8(inflator)? as usize;
            }
            let index = (encoded >> shift) & mask;

            out[offset..offset + 4]
                .copy_from_slice(&palette_buffer[index * 4..index * 4 + 4]);
            offset += 4;
            shift -= bits_per_pixel as isize;
        }
        // Row padding: restart on a fresh byte for the next row.
        if shift < 8 - bits_per_pixel as isize && row < tile_h - 1 {
            encoded = inflate_u8(inflator)? as usize;
        }
    }
    Ok(())
}

/// Plain RLE tile: (pixel, run-length) pairs until the tile is full.
fn decode_rle_tile(
    inflator: &mut Inflator,
    pixel_buffer: &mut [u8],
    out: &mut [u8],
    tile_size: usize,
) -> Result<(), RfbError> {
    let mut i = 0usize;
    while i < tile_size {
        read_pixels(inflator, pixel_buffer, 1)?;
        let length = read_rle_length(inflator)?;
        for _ in 0..length {
            if i >= tile_size {
                return Err(RfbError::ProtocolViolation(format!(
                    "rle run overflows tile: length {length}"
                )));
            }
            out[i * 4..i * 4 + 4].copy_from_slice(&pixel_buffer[..4]);
            i += 1;
        }
    }
    Ok(())
}

/// Palette RLE tile: index byte >= 128 marks an explicit run, otherwise
/// the run length is implicitly 1.
fn decode_rle_palette_tile(
    inflator: &mut Inflator,
    palette_buffer: &mut [u8],
    out: &mut [u8],
    palette_size: usize,
    tile_size: usize,
) -> Result<(), RfbError> {
    read_pixels(inflator, palette_buffer, palette_size)?;

    let mut offset = 0usize;
    while offset < tile_size {
        let mut index = inflate_u8(inflator)? as usize;
        let mut length = 1usize;
        if index >= 128 {
            index -= 128;
            length = read_rle_length(inflator)?;
        }
        if index > palette_size {
            return Err(RfbError::ProtocolViolation(format!(
                "palette index {index} out of range for palette of {palette_size}"
            )));
        }
        if offset + length > tile_size {
            return Err(RfbError::ProtocolViolation(format!(
                "rle length {length} exceeds remaining tile space {}",
                tile_size - offset
            )));
        }

        for _ in 0..length {
            out[offset * 4..offset * 4 + 4]
                .copy_from_slice(&palette_buffer[index * 4..index * 4 + 4]);
            offset += 1;
        }
    }
    Ok(())
}

/// Run lengths accumulate 255-valued bytes and terminate on the first
/// byte below 255; the final length is the sum plus one.
fn read_rle_length(inflator: &mut Inflator) -> Result<usize, RfbError> {
    let mut length = 0usize;
    loop {
        let current = inflate_u8(inflator)?;
        length += current as usize;
        if current != 255 {
            break;
        }
    }
    Ok(length + 1)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DisplayCall, RecordingDisplay, feed, socket_with_data};
    use crate::zlib::Deflator;

    fn zrle_rect(tile_stream: &[u8]) -> Vec<u8> {
        let mut deflator = Deflator::new();
        let compressed = deflator.deflate(tile_stream).unwrap();
        let mut wire = (compressed.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&compressed);
        wire
    }

    #[test]
    fn rle_length_continuation() {
        let mut deflator = Deflator::new();
        let compressed = deflator.deflate(&[255, 255, 10]).unwrap();
        let mut inflator = Inflator::new();
        inflator.set_input(Some(&compressed));
        assert_eq!(read_rle_length(&mut inflator).unwrap(), 521);
    }

    #[test]
    fn solid_tile_fills() {
        let wire = zrle_rect(&[1, 30, 40, 50]); // subencoding 1 + one CPIXEL
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(2, 3, 10, 10, &mut sock, &mut display, 24).unwrap());
        assert_eq!(
            display.calls,
            vec![DisplayCall::FillRect { x: 2, y: 3, width: 10, height: 10, color: [30, 40, 50] }]
        );
    }

    #[test]
    fn raw_tile_blits_pixels() {
        let mut stream = vec![0u8]; // raw subencoding
        stream.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]); // 2x2 CPIXELs
        let wire = zrle_rect(&stream);
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(&pixels[..8], &[1, 2, 3, 255, 4, 5, 6, 255]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn packed_palette_tile() {
        // 2 colors -> 1 bit per pixel; 4x2 tile -> one byte per row.
        let mut stream = vec![2u8]; // palette of 2
        stream.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
        stream.push(0b1010_0000); // row 0: w b w b
        stream.push(0b0101_0000); // row 1: b w b w
        let wire = zrle_rect(&stream);
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(0, 0, 4, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                let px = |i: usize| pixels[i * 4];
                assert_eq!(px(0), 255);
                assert_eq!(px(1), 0);
                assert_eq!(px(4), 0); // row 1 starts on a fresh byte
                assert_eq!(px(5), 255);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn rle_tile_repeats_pixels() {
        let mut stream = vec![128u8];
        stream.extend_from_slice(&[9, 8, 7]); // pixel
        stream.push(3); // run length 4
        let wire = zrle_rect(&stream);
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                for px in pixels.chunks_exact(4) {
                    assert_eq!(px, &[9, 8, 7, 255]);
                }
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn rle_palette_tile_mixes_runs_and_singles() {
        let mut stream = vec![130u8]; // palette RLE, 2 colors
        stream.extend_from_slice(&[1, 1, 1, 2, 2, 2]);
        stream.push(128); // index 0 with explicit run
        stream.push(2); // run length 3
        stream.push(1); // single pixel of color 1
        let wire = zrle_rect(&stream);
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(pixels[0], 1);
                assert_eq!(pixels[4], 1);
                assert_eq!(pixels[8], 1);
                assert_eq!(pixels[12], 2);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn waits_for_full_blob_with_partial_delivery() {
        let wire = zrle_rect(&[1, 5, 5, 5]);
        let mut sock = socket_with_data(&wire[..2]);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(!dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
        feed(&mut sock, &wire[2..wire.len() - 1]);
        assert!(!dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
        feed(&mut sock, &wire[wire.len() - 1..]);
        assert!(dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
        assert_eq!(display.calls.len(), 1);
    }

    #[test]
    fn stream_history_persists_across_rectangles() {
        // Two rectangles compressed by one deflator stream; the second
        // depends on the first's history window.
        let mut deflator = Deflator::new();
        let first = deflator.deflate(&[1, 10, 20, 30]).unwrap();
        let second = deflator.deflate(&[1, 10, 20, 30]).unwrap();

        let mut dec = ZrleDecoder::new();
        let mut display = RecordingDisplay::new();

        for blob in [first, second] {
            let mut wire = (blob.len() as u32).to_be_bytes().to_vec();
            wire.extend_from_slice(&blob);
            let mut sock = socket_with_data(&wire);
            assert!(dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
        }
        assert_eq!(display.calls.len(), 2);
    }

    #[test]
    fn bad_subencoding_is_fatal() {
        let wire = zrle_rect(&[17]); // 17 is outside every valid range
        let mut sock = socket_with_data(&wire);
        let mut display = RecordingDisplay::new();
        let mut dec = ZrleDecoder::new();

        assert!(dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).is_err());
    }
}
