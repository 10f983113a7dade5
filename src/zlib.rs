//! Persistent DEFLATE stream wrappers.
//!
//! The RFB compressed encodings (Tight, ZRLE) run one zlib stream across
//! many rectangles: the history window set up by earlier rectangles is
//! required to decode later ones. These wrappers therefore keep their
//! [`flate2`] stream context alive across calls — an [`Inflator`] or
//! [`Deflator`] must live as long as the wire stream it tracks, and is
//! reset only on an explicit stream-reset signal from the server.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::RfbError;

/// Output is produced in chunks of this size and concatenated.
const CHUNK_SIZE: usize = 1024 * 10 * 10;

// ── Inflator ─────────────────────────────────────────────────────

/// Stateful zlib decompressor fed one compressed chunk at a time.
pub struct Inflator {
    strm: Decompress,
    input: Vec<u8>,
    /// Bytes of `input` already consumed by the stream.
    next_in: usize,
}

impl Inflator {
    pub fn new() -> Self {
        Self {
            strm: Decompress::new(true),
            input: Vec::new(),
            next_in: 0,
        }
    }

    /// Stage the next compressed chunk, or clear the staged input.
    pub fn set_input(&mut self, data: Option<&[u8]>) {
        self.input.clear();
        self.next_in = 0;
        if let Some(data) = data {
            self.input.extend_from_slice(data);
        }
    }

    /// Decompress until exactly `expected` bytes have been produced.
    ///
    /// Fails if the staged input runs out first or the stream reports an
    /// error — for the RFB encodings the server always sends enough
    /// compressed data to yield the advertised plaintext length.
    pub fn inflate(&mut self, expected: usize) -> Result<Vec<u8>, RfbError> {
        let mut out = vec![0u8; expected];
        let mut produced = 0usize;

        while produced < expected {
            let in_before = self.strm.total_in();
            let out_before = self.strm.total_out();

            let status = self
                .strm
                .decompress(
                    &self.input[self.next_in..],
                    &mut out[produced..],
                    FlushDecompress::None,
                )
                .map_err(|e| RfbError::Zlib(format!("inflate failed: {e}")))?;

            let consumed = (self.strm.total_in() - in_before) as usize;
            let emitted = (self.strm.total_out() - out_before) as usize;
            self.next_in += consumed;
            produced += emitted;

            match status {
                Status::Ok | Status::StreamEnd => {}
                Status::BufError => {
                    return Err(RfbError::Zlib("inflate out of input".into()));
                }
            }
            if consumed == 0 && emitted == 0 {
                return Err(RfbError::Zlib(format!(
                    "inflate stalled: {produced} of {expected} bytes produced"
                )));
            }
        }

        Ok(out)
    }

    /// Discard all stream state (history window included).
    pub fn reset(&mut self) {
        self.strm.reset(true);
        self.input.clear();
        self.next_in = 0;
    }
}

impl Default for Inflator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Deflator ─────────────────────────────────────────────────────

/// Stateful zlib compressor. Every call ends in a full flush so each
/// call's output is independently decodable, while the shared history
/// window still improves ratios across calls.
pub struct Deflator {
    strm: Compress,
}

impl Deflator {
    pub fn new() -> Self {
        Self {
            strm: Compress::new(Compression::default(), true),
        }
    }

    /// Compress `data`, chunking across multiple underlying calls when the
    /// output exceeds the internal chunk buffer.
    pub fn deflate(&mut self, data: &[u8]) -> Result<Vec<u8>, RfbError> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut next_in = 0usize;

        loop {
            let in_before = self.strm.total_in();
            let out_before = self.strm.total_out();

            let status = self
                .strm
                .compress(&data[next_in..], &mut chunk, FlushCompress::Full)
                .map_err(|e| RfbError::Zlib(format!("deflate failed: {e}")))?;

            if !matches!(status, Status::Ok | Status::StreamEnd) {
                return Err(RfbError::Zlib("deflate failed".into()));
            }

            next_in += (self.strm.total_in() - in_before) as usize;
            let emitted = (self.strm.total_out() - out_before) as usize;
            out.extend_from_slice(&chunk[..emitted]);

            // Flush complete once all input is consumed and the last call
            // did not fill the whole chunk (i.e. nothing is pending).
            if next_in >= data.len() && emitted < chunk.len() {
                break;
            }
        }

        Ok(out)
    }
}

impl Default for Deflator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
