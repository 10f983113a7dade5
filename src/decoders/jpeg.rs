//! JPEG encoding (RealVNC variant): each rectangle is a JPEG file sent as
//! raw marker segments.
//!
//! RealVNC servers omit the quantization and Huffman tables from updates
//! that reuse the previous ones, so both are cached across rectangles and
//! spliced back in after the SOF segment when missing. The cache is
//! replaced whenever an update carries fresh tables.

use crate::display::Display;
use crate::error::RfbError;
use crate::socket::Socket;

pub struct JpegDecoder {
    cached_quant_tables: Vec<Vec<u8>>,
    cached_huffman_tables: Vec<Vec<u8>>,
    /// Segments of the rectangle currently being accumulated.
    segments: Vec<Vec<u8>>,
}

impl JpegDecoder {
    pub fn new() -> Self {
        Self {
            cached_quant_tables: Vec::new(),
            cached_huffman_tables: Vec::new(),
            segments: Vec::new(),
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
        // Accumulate segments until the end-of-image marker.
        loop {
            let segment = match Self::read_segment(sock)? {
                None => return Ok(false),
                Some(segment) => segment,
            };
            let last = segment[1];
            self.segments.push(segment);
            if last == 0xd9 {
                break; // EOI
            }
        }

        let mut huffman_tables = Vec::new();
        let mut quant_tables = Vec::new();
        for segment in &self.segments {
            match segment[1] {
                0xc4 => huffman_tables.push(segment.clone()),
                0xdb => quant_tables.push(segment.clone()),
                _ => {}
            }
        }

        let sof_index = self
            .segments
            .iter()
            .position(|s| s[1] == 0xc0 || s[1] == 0xc2)
            .ok_or_else(|| RfbError::ProtocolViolation("JPEG image without SOF".into()))?;

        // Splice cached tables in when the server omitted them.
        if quant_tables.is_empty() {
            for (i, table) in self.cached_quant_tables.iter().enumerate() {
                self.segments.insert(sof_index + 1 + i, table.clone());
            }
        }
        if huffman_tables.is_empty() {
            for (i, table) in self.cached_huffman_tables.iter().enumerate() {
                self.segments.insert(sof_index + 1 + i, table.clone());
            }
        }

        let data: Vec<u8> = self.segments.concat();
        display.image_rect(x, y, width, height, "image/jpeg", &data);

        if !huffman_tables.is_empty() {
            self.cached_huffman_tables = huffman_tables;
        }
        if !quant_tables.is_empty() {
            self.cached_quant_tables = quant_tables;
        }

        self.segments.clear();

        Ok(true)
    }

    /// Read one marker segment, or `None` when more bytes are needed.
    ///
    /// Markers 0xd0-0xd9 and 0x01 carry no length field. Scan data (SOS)
    /// does not advertise its length at all: the only way to find its end
    /// is to scan for the next marker that is neither a stuffed 0x00 nor a
    /// restart marker.
    fn read_segment(sock: &mut Socket) -> Result<Option<Vec<u8>>, RfbError> {
        if sock.rq_wait(2, 0) {
            return Ok(None);
        }

        let marker = sock.rq_shift8();
        if marker != 0xff {
            return Err(RfbError::ProtocolViolation(format!(
                "illegal JPEG marker byte {marker:#04x}"
            )));
        }
        let kind = sock.rq_shift8();
        if (0xd0..=0xd9).contains(&kind) || kind == 0x01 {
            // No length after marker.
            return Ok(Some(vec![marker, kind]));
        }

        if sock.rq_wait(2, 2) {
            return Ok(None);
        }

        let length = sock.rq_shift16() as usize;
        if length < 2 {
            return Err(RfbError::ProtocolViolation(format!(
                "illegal JPEG segment length {length}"
            )));
        }

        if sock.rq_wait(length - 2, 4) {
            return Ok(None);
        }

        let mut extra = 0usize;
        if kind == 0xda {
            // Start of scan: hunt for the trailing marker byte-by-byte.
            extra += 2;
            loop {
                if sock.rq_wait(length - 2 + extra, 4) {
                    return Ok(None);
                }
                let peek = sock.rq_peek_bytes(length - 2 + extra);
                let tail1 = peek[peek.len() - 2];
                let tail0 = peek[peek.len() - 1];
                if tail1 == 0xff && tail0 != 0x00 && !(0xd0..=0xd7).contains(&tail0) {
                    extra -= 2;
                    break;
                }
                extra += 1;
            }
        }

        let mut segment = Vec::with_capacity(2 + length + extra);
        segment.push(marker);
        segment.push(kind);
        segment.push((length >> 8) as u8);
        segment.push(length as u8);
        segment.extend_from_slice(&sock.rq_shift_bytes(length - 2 + extra));

        Ok(Some(segment))
    }
}

impl Default for JpegDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{DisplayCall, RecordingDisplay, feed, socket_with_data};

    fn segment(kind: u8, payload: &[u8]) -> Vec<u8> {
        let mut s = vec![0xff, kind];
        s.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        s.extend_from_slice(payload);
        s
    }

    /// A minimal plausible JPEG: SOI, DQT, DHT, SOF0, SOS + scan, EOI.
    fn jpeg_image(with_tables: bool) -> Vec<u8> {
        let mut data = vec![0xff, 0xd8]; // SOI
        if with_tables {
            data.extend_from_slice(&segment(0xdb, &[0x42; 4])); // DQT
            data.extend_from_slice(&segment(0xc4, &[0x17; 4])); // DHT
        }
        data.extend_from_slice(&segment(0xc0, &[1, 2, 3])); // SOF0
        data.extend_from_slice(&segment(0xda, &[0x05])); // SOS header
        data.extend_from_slice(&[0x10, 0x20, 0x00, 0xff, 0x00, 0x30]); // scan (stuffed 0xff)
        data.extend_from_slice(&[0xff, 0xd9]); // EOI
        data
    }

    fn decode(
        dec: &mut JpegDecoder,
        display: &mut RecordingDisplay,
        wire: &[u8],
    ) -> Result<bool, RfbError> {
        let mut sock = socket_with_data(wire);
        dec.decode_rect(0, 0, 4, 4, &mut sock, display, 24)
    }

    #[test]
    fn passes_complete_image_through() {
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();
        let wire = jpeg_image(true);

        assert!(decode(&mut dec, &mut display, &wire).unwrap());
        match &display.calls[0] {
            DisplayCall::ImageRect { mime, data, .. } => {
                assert_eq!(mime, "image/jpeg");
                assert_eq!(data, &wire);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn reuses_cached_tables_when_server_omits_them() {
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();

        assert!(decode(&mut dec, &mut display, &jpeg_image(true)).unwrap());
        assert!(decode(&mut dec, &mut display, &jpeg_image(false)).unwrap());

        match &display.calls[1] {
            DisplayCall::ImageRect { data, .. } => {
                // The tables from the first image were spliced back in.
                assert!(data.windows(2).any(|w| w == [0xff, 0xdb]));
                assert!(data.windows(2).any(|w| w == [0xff, 0xc4]));
                // And they sit after the SOF segment.
                let sof = data.windows(2).position(|w| w == [0xff, 0xc0]).unwrap();
                let dqt = data.windows(2).position(|w| w == [0xff, 0xdb]).unwrap();
                assert!(dqt > sof);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn fresh_tables_replace_the_cache() {
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();

        assert!(decode(&mut dec, &mut display, &jpeg_image(true)).unwrap());

        // Second image with different table contents.
        let mut wire = vec![0xff, 0xd8];
        wire.extend_from_slice(&segment(0xdb, &[0x77; 4]));
        wire.extend_from_slice(&segment(0xc4, &[0x78; 4]));
        wire.extend_from_slice(&segment(0xc0, &[1, 2, 3]));
        wire.extend_from_slice(&segment(0xda, &[0x05]));
        wire.extend_from_slice(&[0x10, 0xff, 0xd9]);
        assert!(decode(&mut dec, &mut display, &wire).unwrap());

        // Third image without tables gets the *new* ones.
        assert!(decode(&mut dec, &mut display, &jpeg_image(false)).unwrap());
        match &display.calls[2] {
            DisplayCall::ImageRect { data, .. } => {
                assert!(data.windows(4).any(|w| w == [0x77, 0x77, 0x77, 0x77]));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn resumes_across_partial_segments() {
        let wire = jpeg_image(true);
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();
        let mut sock = socket_with_data(&[]);

        for &b in &wire {
            assert!(!dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
            feed(&mut sock, &[b]);
        }
        assert!(dec.decode_rect(0, 0, 4, 4, &mut sock, &mut display, 24).unwrap());
        match &display.calls[0] {
            DisplayCall::ImageRect { data, .. } => assert_eq!(data, &wire),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn missing_sof_is_fatal() {
        let wire = vec![0xff, 0xd8, 0xff, 0xd9];
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();
        let err = decode(&mut dec, &mut display, &wire);
        assert!(matches!(err, Err(RfbError::ProtocolViolation(_))));
    }

    #[test]
    fn bad_marker_byte_is_fatal() {
        let mut dec = JpegDecoder::new();
        let mut display = RecordingDisplay::new();
        assert!(decode(&mut dec, &mut display, &[0x12, 0x34]).is_err());
    }
}
