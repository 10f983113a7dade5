//! Tight encoding: per-rectangle compression control, four persistent
//! zlib streams, and the Copy/Palette/Gradient pixel filters.
//!
//! The compression-control byte's low nibble carries per-stream reset
//! flags; the high nibble selects Fill/JPEG/PNG/Basic. Basic mode picks
//! one of the four zlib streams (2-bit id) whose history window spans the
//! whole connection, and optionally names a filter. Data blocks smaller
//! than 12 bytes are sent uncompressed even in Basic mode, skipping the
//! zlib overhead.

use tracing::debug;

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;
use crate::zlib::Inflator;

// Filter ids in Basic mode.
const FILTER_COPY: u8 = 0;
const FILTER_PALETTE: u8 = 1;
const FILTER_GRADIENT: u8 = 2;

/// Blocks below this many uncompressed bytes bypass zlib entirely.
const MIN_COMPRESSED_SIZE: usize = 12;

pub struct TightDecoder {
    /// High nibble of the control byte, kept until the rect completes.
    ctl: Option<u8>,
    filter: Option<u8>,
    /// Palette entries for the current rect; zero between palettes.
    num_colors: usize,
    /// 256 colors x 3 bytes, the maximum an 8-bit palette needs.
    palette: [u8; 768],
    /// Pending compact-length value, consumed by `read_data`.
    len: usize,
    zlibs: [Inflator; 4],
    /// Whether this instance speaks the TightPNG variant.
    png: bool,
}

impl TightDecoder {
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// TightPNG variant: PNG replaces Basic compression entirely.
    pub fn new_png() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(png: bool) -> Self {
        Self {
            ctl: None,
            filter: None,
            num_colors: 0,
            palette: [0; 768],
            len: 0,
            zlibs: std::array::from_fn(|_| Inflator::new()),
            png,
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
        let ctl = match self.ctl {
            Some(ctl) => ctl,
            None => {
                if sock.rq_wait(1, 0) {
                    return Ok(false);
                }

                let byte = sock.rq_shift8();

                // Reset streams if the server requests it.
                for i in 0..4 {
                    if (byte >> i) & 1 != 0 {
                        self.zlibs[i].reset();
                        debug!(stream = i, "reset tight zlib stream");
                    }
                }

                let ctl = byte >> 4;
                self.ctl = Some(ctl);
                ctl
            }
        };

        let done = match ctl {
            0x08 => self.fill_rect(x, y, width, height, sock, display)?,
            0x09 => self.jpeg_rect(x, y, width, height, sock, display)?,
            0x0a => self.png_rect(x, y, width, height, sock, display)?,
            _ if ctl & 0x08 == 0 => self.basic_rect(ctl, x, y, width, height, sock, display)?,
            _ => {
                return Err(RfbError::IllegalControlByte {
                    context: "tight compression-control",
                    value: ctl,
                });
            }
        };

        if done {
            self.ctl = None;
        }

        Ok(done)
    }

    fn fill_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if sock.rq_wait(3, 0) {
            return Ok(false);
        }

        let pixel = sock.rq_shift_bytes(3);
        display.fill_rect(x, y, width, height, [pixel[0], pixel[1], pixel[2]]);

        Ok(true)
    }

    fn jpeg_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        match self.read_data(sock) {
            None => Ok(false),
            Some(data) => {
                display.image_rect(x, y, width, height, "image/jpeg", &data);
                Ok(true)
            }
        }
    }

    fn png_rect(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if !self.png {
            return Err(RfbError::ProtocolViolation(
                "PNG received in standard Tight rect".into(),
            ));
        }
        match self.read_data(sock) {
            None => Ok(false),
            Some(data) => {
                // Passed through opaquely; an external image decoder
                // rasterizes it.
                display.image_rect(x, y, width, height, "image/png", &data);
                Ok(true)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn basic_rect(
        &mut self,
        ctl: u8,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if self.png {
            return Err(RfbError::ProtocolViolation(
                "BasicCompression received in TightPNG rect".into(),
            ));
        }

        let filter = match self.filter {
            Some(filter) => filter,
            None => {
                let filter = if ctl & 0x4 != 0 {
                    // Explicit filter id, read once per rectangle.
                    if sock.rq_wait(1, 0) {
                        return Ok(false);
                    }
                    sock.rq_shift8()
                } else {
                    // Implicit CopyFilter.
                    FILTER_COPY
                };
                self.filter = Some(filter);
                filter
            }
        };

        let stream_id = (ctl & 0x3) as usize;

        let done = match filter {
            FILTER_COPY => self.copy_filter(stream_id, x, y, width, height, sock, display)?,
            FILTER_PALETTE => self.palette_filter(stream_id, x, y, width, height, sock, display)?,
            FILTER_GRADIENT => {
                self.gradient_filter(stream_id, x, y, width, height, sock, display)?
            }
            _ => {
                return Err(RfbError::IllegalControlByte {
                    context: "tight filter",
                    value: filter,
                });
            }
        };

        if done {
            self.filter = None;
        }

        Ok(done)
    }

    /// Fetch a data block of known uncompressed size: literal bytes when
    /// below the compression threshold, otherwise through the stream's
    /// inflator.
    fn read_block(
        &mut self,
        stream_id: usize,
        uncompressed_size: usize,
        sock: &mut Socket,
    ) -> Result<Option<Vec<u8>>, RfbError> {
        if uncompressed_size < MIN_COMPRESSED_SIZE {
            if sock.rq_wait(uncompressed_size, 0) {
                return Ok(None);
            }
            return Ok(Some(sock.rq_shift_bytes(uncompressed_size)));
        }

        let compressed = match self.read_data(sock) {
            None => return Ok(None),
            Some(data) => data,
        };

        self.zlibs[stream_id].set_input(Some(&compressed));
        let data = self.zlibs[stream_id].inflate(uncompressed_size)?;
        self.zlibs[stream_id].set_input(None);
        Ok(Some(data))
    }

    #[allow(clippy::too_many_arguments)]
    fn copy_filter(
        &mut self,
        stream_id: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        let uncompressed_size = (width * height * 3) as usize;
        if uncompressed_size == 0 {
            return Ok(true);
        }

        let data = match self.read_block(stream_id, uncompressed_size, sock)? {
            None => return Ok(false),
            Some(data) => data,
        };

        let mut rgbx = vec![0u8; (width * height * 4) as usize];
        for (px, src) in rgbx.chunks_exact_mut(4).zip(data.chunks_exact(3)) {
            px[0] = src[0];
            px[1] = src[1];
            px[2] = src[2];
            px[3] = 255;
        }

        display.blit_image(x, y, width, height, &rgbx, 0);

        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn palette_filter(
        &mut self,
        stream_id: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        if self.num_colors == 0 {
            if sock.rq_wait(1, 0) {
                return Ok(false);
            }

            let num_colors = sock.rq_peek8() as usize + 1;
            let palette_size = num_colors * 3;

            if sock.rq_wait(1 + palette_size, 0) {
                return Ok(false);
            }

            self.num_colors = num_colors;
            sock.rq_skip_bytes(1);

            sock.rq_shift_into(&mut self.palette[..palette_size]);
        }

        let bpp: usize = if self.num_colors <= 2 { 1 } else { 8 };
        let row_size = (width as usize * bpp).div_ceil(8);
        let uncompressed_size = row_size * height as usize;

        if uncompressed_size == 0 {
            self.num_colors = 0;
            return Ok(true);
        }

        let data = match self.read_block(stream_id, uncompressed_size, sock)? {
            None => return Ok(false),
            Some(data) => data,
        };

        // Convert indexed image data to RGB.
        if self.num_colors == 2 {
            self.mono_rect(x, y, width, height, &data, display);
        } else {
            self.palette_rect(x, y, width, height, &data, display);
        }

        self.num_colors = 0;

        Ok(true)
    }

    /// 1-bit palette fast path: each byte packs eight pixels, rows padded
    /// to whole bytes.
    fn mono_rect(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
        display: &mut dyn Display,
    ) {
        let width = width as usize;
        let height = height as usize;
        let mut dest = vec![0u8; width * height * 4];
        let w = width.div_ceil(8);
        let w1 = width / 8;

        for row in 0..height {
            for bx in 0..w1 {
                for b in (0..8).rev() {
                    let dp = (row * width + bx * 8 + 7 - b) * 4;
                    let sp = ((data[row * w + bx] >> b) & 1) as usize * 3;
                    dest[dp] = self.palette[sp];
                    dest[dp + 1] = self.palette[sp + 1];
                    dest[dp + 2] = self.palette[sp + 2];
                    dest[dp + 3] = 255;
                }
            }

            if width % 8 != 0 {
                for b in ((8 - width % 8)..8).rev() {
                    let dp = (row * width + w1 * 8 + 7 - b) * 4;
                    let sp = ((data[row * w + w1] >> b) & 1) as usize * 3;
                    dest[dp] = self.palette[sp];
                    dest[dp + 1] = self.palette[sp + 1];
                    dest[dp + 2] = self.palette[sp + 2];
                    dest[dp + 3] = 255;
                }
            }
        }

        display.blit_image(x, y, width as u32, height as u32, &dest, 0);
    }

    /// 8-bit palette: one index byte per pixel.
    fn palette_rect(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
        display: &mut dyn Display,
    ) {
        let total = (width * height) as usize;
        let mut dest = vec![0u8; total * 4];
        for (px, &index) in dest.chunks_exact_mut(4).zip(data.iter().take(total)) {
            let sp = index as usize * 3;
            px[0] = self.palette[sp];
            px[1] = self.palette[sp + 1];
            px[2] = self.palette[sp + 2];
            px[3] = 255;
        }

        display.blit_image(x, y, width, height, &dest, 0);
    }

    /// Gradient filter: each channel is a residual against a MED-style
    /// predictor over the already-decoded left/upper/upper-left pixels,
    /// clamped to [0, 255]; the first row and column predict from zero.
    #[allow(clippy::too_many_arguments)]
    fn gradient_filter(
        &mut self,
        stream_id: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        sock: &mut Socket,
        display: &mut dyn Display,
    ) -> Result<bool, RfbError> {
        // TPIXEL is 3 bytes.
        let uncompressed_size = (width * height * 3) as usize;
        if uncompressed_size == 0 {
            return Ok(true);
        }

        let data = match self.read_block(stream_id, uncompressed_size, sock)? {
            None => return Ok(false),
            Some(data) => data,
        };

        let width = width as usize;
        let height = height as usize;
        let mut rgbx = vec![0u8; width * height * 4];

        let mut rgbx_index = 0usize;
        let mut data_index = 0usize;
        let mut left = [0u8; 3];
        for _ in 0..width {
            for c in 0..3 {
                let value = data[data_index].wrapping_add(left[c]);
                data_index += 1;
                rgbx[rgbx_index] = value;
                rgbx_index += 1;
                left[c] = value;
            }
            rgbx[rgbx_index] = 255;
            rgbx_index += 1;
        }

        let mut upper_index = 0usize;
        let mut upper = [0u8; 3];
        let mut upper_left = [0u8; 3];
        for _ in 1..height {
            left.fill(0);
            upper_left.fill(0);
            for _ in 0..width {
                for c in 0..3 {
                    upper[c] = rgbx[upper_index];
                    upper_index += 1;
                    let prediction = (left[c] as i32 + upper[c] as i32 - upper_left[c] as i32)
                        .clamp(0, 255) as u8;
                    let value = data[data_index].wrapping_add(prediction);
                    data_index += 1;
                    rgbx[rgbx_index] = value;
                    rgbx_index += 1;
                    upper_left[c] = upper[c];
                    left[c] = value;
                }
                rgbx[rgbx_index] = 255;
                rgbx_index += 1;
                upper_index += 1; // skip the alpha byte
            }
        }

        display.blit_image(x, y, width as u32, height as u32, &rgbx, 0);

        Ok(true)
    }

    /// Read one compact-length-prefixed data block. The length prefix is
    /// 1-3 bytes, 7 bits each, continued while the top bit is set; a
    /// partially read length survives in `self.len` across invocations.
    fn read_data(&mut self, sock: &mut Socket) -> Option<Vec<u8>> {
        if self.len == 0 {
            if sock.rq_wait(3, 0) {
                return None;
            }

            let mut byte = sock.rq_shift8();
            self.len = (byte & 0x7f) as usize;
            if byte & 0x80 != 0 {
                byte = sock.rq_shift8();
                self.len |= ((byte & 0x7f) as usize) << 7;
                if byte & 0x80 != 0 {
                    byte = sock.rq_shift8();
                    self.len |= (byte as usize) << 14;
                }
            }
        }

        if sock.rq_wait(self.len, 0) {
            return None;
        }

        let data = sock.rq_shift_bytes(self.len);
        self.len = 0;

        Some(data)
    }
}

impl Default for TightDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DisplayCall, RecordingDisplay, feed, socket_with_data};
    use crate::zlib::Deflator;

    #[test]
    fn fill_rect_mode() {
        // ctl 0x08 in high nibble, no stream resets.
        let mut sock = socket_with_data(&[0x80, 1, 2, 3]);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(5, 6, 7, 8, &mut sock, &mut display, 24).unwrap());
        assert_eq!(
            display.calls,
            vec![DisplayCall::FillRect { x: 5, y: 6, width: 7, height: 8, color: [1, 2, 3] }]
        );
    }

    #[test]
    fn small_copy_block_is_read_uncompressed() {
        // 2x1 rect: 6 bytes < 12, sent literal even in Basic mode.
        let mut data = vec![0x00]; // Basic, stream 0, no explicit filter
        data.extend_from_slice(&[10, 11, 12, 20, 21, 22]);
        let mut sock = socket_with_data(&data);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 1, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(&pixels[..], &[10, 11, 12, 255, 20, 21, 22, 255]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn large_copy_block_goes_through_zlib() {
        // 2x2 rect: 12 bytes, compressed path.
        let raw: Vec<u8> = (0..12).collect();
        let mut deflator = Deflator::new();
        let compressed = deflator.deflate(&raw).unwrap();

        let mut data = vec![0x00];
        assert!(compressed.len() < 0x80);
        data.push(compressed.len() as u8);
        data.extend_from_slice(&compressed);
        let mut sock = socket_with_data(&data);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(&pixels[..8], &[0, 1, 2, 255, 3, 4, 5, 255]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn mono_palette_unpacks_bits() {
        // 2-color palette, 9x1 rect -> 2 bytes of bitmap (row padded).
        let mut data = vec![0x40]; // Basic + explicit filter
        data.push(FILTER_PALETTE);
        data.push(1); // numColors - 1
        data.extend_from_slice(&[0, 0, 0, 255, 255, 255]); // black, white
        data.extend_from_slice(&[0b1010_0000, 0b1000_0000]); // 9 pixels
        let mut sock = socket_with_data(&data);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(0, 0, 9, 1, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                let px = |i: usize| pixels[i * 4];
                assert_eq!(px(0), 255); // bit 1 -> white
                assert_eq!(px(1), 0);
                assert_eq!(px(2), 255);
                assert_eq!(px(3), 0);
                assert_eq!(px(8), 255); // first bit of second byte
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn indexed_palette_maps_colors() {
        // 3-color palette forces the 8-bit path; 2x2 rect = 4 index
        // bytes < 12, so literal.
        let mut data = vec![0x40];
        data.push(FILTER_PALETTE);
        data.push(2); // numColors - 1 = 2 -> 3 colors
        data.extend_from_slice(&[9, 9, 9, 1, 2, 3, 7, 7, 7]);
        data.extend_from_slice(&[0, 1, 2, 1]);
        let mut sock = socket_with_data(&data);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(&pixels[4..7], &[1, 2, 3]);
                assert_eq!(&pixels[8..11], &[7, 7, 7]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn gradient_filter_applies_predictor() {
        // 2x2 rect of residuals, all 10s. First pixel: 10. Second:
        // left=10 -> 20. Second row first: upper=10 -> 20. Last:
        // left 20 + upper 20 - upperleft 10 = 30 -> 40.
        let mut data = vec![0x40];
        data.push(FILTER_GRADIENT);
        // 12 bytes -> compressed path.
        let residuals = [10u8; 12];
        let mut deflator = Deflator::new();
        let compressed = deflator.deflate(&residuals).unwrap();
        data.push(compressed.len() as u8);
        data.extend_from_slice(&compressed);
        let mut sock = socket_with_data(&data);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::BlitImage { pixels, .. } => {
                assert_eq!(pixels[0], 10);
                assert_eq!(pixels[4], 20);
                assert_eq!(pixels[8], 20);
                assert_eq!(pixels[12], 40);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn stream_reset_bits_reset_only_named_streams() {
        // Prime stream 0 with history, then send a rect whose ctl resets
        // stream 1 — stream 0's history must still decode.
        let raw: Vec<u8> = (0..12).collect();
        let mut deflator = Deflator::new();
        let first = deflator.deflate(&raw).unwrap();
        let second = deflator.deflate(&raw).unwrap();

        let mut dec = TightDecoder::new();
        let mut display = RecordingDisplay::new();

        let mut data = vec![0x00, first.len() as u8];
        data.extend_from_slice(&first);
        let mut sock = socket_with_data(&data);
        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());

        // Reset bit 1 (stream 1), keep using stream 0.
        let mut data = vec![0x02, second.len() as u8];
        data.extend_from_slice(&second);
        feed(&mut sock, &data);
        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        assert_eq!(display.calls.len(), 2);
    }

    #[test]
    fn resumes_after_partial_control_and_length() {
        let raw: Vec<u8> = (100..112).collect();
        let mut deflator = Deflator::new();
        let compressed = deflator.deflate(&raw).unwrap();
        let mut wire = vec![0x00, compressed.len() as u8];
        wire.extend_from_slice(&compressed);

        let mut sock = socket_with_data(&[]);
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        for &b in &wire {
            assert!(!dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
            feed(&mut sock, &[b]);
        }
        assert!(dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24).unwrap());
        assert_eq!(display.calls.len(), 1);
    }

    #[test]
    fn illegal_control_byte_is_fatal() {
        let mut sock = socket_with_data(&[0xb0]); // ctl nibble 0x0b
        let mut display = RecordingDisplay::new();
        let mut dec = TightDecoder::new();

        assert!(matches!(
            dec.decode_rect(0, 0, 2, 2, &mut sock, &mut display, 24),
            Err(RfbError::IllegalControlByte { .. })
        ));
    }
}
