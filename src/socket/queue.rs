//! Receive and send buffers backing a [`Socket`](super::Socket).
//!
//! The receive side ([`ByteQueue`]) is the piece that makes every decoder
//! re-entrant on partial frames: a consumer asks `wait(need, lookback)`
//! before shifting, and when the bytes are not there yet the queue rewinds
//! the read cursor by `lookback` so the next attempt re-reads the same
//! structure from its start. The queue — not each decoder — carries the
//! "how far into this structure was I" bookkeeping.
//!
//! The send side ([`SendQueue`]) coalesces small pushes into one transport
//! write. The flush policy itself lives in the socket, which owns the
//! transport handle.

use bytes::Bytes;

// ── Constants ────────────────────────────────────────────────────

/// Initial receive buffer capacity.
const RECEIVE_CAPACITY: usize = 1024 * 64;

/// Initial send buffer capacity. Appends that would cross this boundary
/// trigger a flush first.
const SEND_CAPACITY: usize = 1024 * 10;

/// Unread data is kept at no more than 1/8 of capacity when the buffer is
/// regrown, bounding how often bytes get copied around.
const HEADROOM_FACTOR: usize = 8;

// ── ByteQueue ────────────────────────────────────────────────────

/// Growable receive buffer with a rewindable read cursor.
///
/// Multi-byte reads are big-endian, matching the RFB wire format.
///
/// # Contract
///
/// Shifts and peeks assume availability was established with [`wait`]
/// (or [`ByteQueue::len`]) first; reading past the valid region is a caller
/// bug and panics. `wait` itself panics when asked to rewind further than
/// the bytes consumed since the last compaction — also a caller bug, since
/// well-formed consumers only rewind over bytes they themselves shifted.
///
/// [`wait`]: ByteQueue::wait
#[derive(Debug)]
pub struct ByteQueue {
    buffer: Vec<u8>,
    /// Number of valid bytes in `buffer`.
    len: usize,
    /// Read cursor; `ri <= len` always holds.
    ri: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; RECEIVE_CAPACITY],
            len: 0,
            ri: 0,
        }
    }

    /// Unread bytes remaining.
    pub fn len(&self) -> usize {
        self.len - self.ri
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` when fewer than `need` bytes remain unread, rewinding
    /// the read cursor by `lookback` as a side effect so the caller can
    /// retry the whole read later.
    ///
    /// # Panics
    ///
    /// Panics if `lookback` exceeds the bytes consumed since the last
    /// compaction — over-rewinding is a programmer error.
    pub fn wait(&mut self, need: usize, lookback: usize) -> bool {
        if self.len() < need {
            assert!(
                lookback <= self.ri,
                "cannot rewind {lookback} bytes, only {} consumed",
                self.ri
            );
            self.ri -= lookback;
            return true;
        }
        false
    }

    /// Read the next byte without consuming it.
    pub fn peek8(&self) -> u8 {
        self.buffer[self.ri]
    }

    /// Borrow the next `len` bytes without consuming them.
    pub fn peek_bytes(&self, len: usize) -> &[u8] {
        &self.buffer[self.ri..self.ri + len]
    }

    pub fn shift8(&mut self) -> u8 {
        let b = self.buffer[self.ri];
        self.ri += 1;
        b
    }

    pub fn shift16(&mut self) -> u16 {
        (self.shift8() as u16) << 8 | self.shift8() as u16
    }

    pub fn shift32(&mut self) -> u32 {
        (self.shift16() as u32) << 16 | self.shift16() as u32
    }

    /// Consume `len` bytes into a fresh vector.
    pub fn shift_bytes(&mut self, len: usize) -> Vec<u8> {
        let out = self.buffer[self.ri..self.ri + len].to_vec();
        self.ri += len;
        out
    }

    /// Consume `len` bytes and borrow them from internal storage; the
    /// borrow rules keep the caller from retaining the slice past the next
    /// queue mutation. The slice is mutable so callers can patch pixels
    /// (e.g. forcing alpha) without an intermediate copy.
    pub fn shift_bytes_mut(&mut self, len: usize) -> &mut [u8] {
        let start = self.ri;
        self.ri += len;
        &mut self.buffer[start..start + len]
    }

    /// Consume `n` bytes without materializing them.
    pub fn skip_bytes(&mut self, n: usize) {
        debug_assert!(self.len() >= n);
        self.ri += n;
    }

    /// Consume `target.len()` bytes directly into the caller's buffer,
    /// avoiding an intermediate allocation.
    pub fn shift_into(&mut self, target: &mut [u8]) {
        let len = target.len();
        target.copy_from_slice(&self.buffer[self.ri..self.ri + len]);
        self.ri += len;
    }

    /// Append incoming bytes, growing or compacting storage as needed.
    ///
    /// Called only from the owning socket's receive path.
    pub fn append(&mut self, data: &[u8]) {
        // Fully drained: restart from the front so lookbacks stay small and
        // the buffer never creeps forward.
        if self.ri == self.len {
            self.ri = 0;
            self.len = 0;
        }

        if self.len + data.len() > self.buffer.len() {
            self.expand_compact(data.len());
        }

        self.buffer[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Make room for `min_fit` more bytes: compact unread data to the front
    /// and, if the buffer is still too small, regrow it with 8x headroom so
    /// repeated appends do not keep copying.
    fn expand_compact(&mut self, min_fit: usize) {
        let unread = self.len - self.ri;
        let required = (unread + min_fit) * HEADROOM_FACTOR;

        if self.buffer.len() < required {
            let mut grown = vec![0; required];
            grown[..unread].copy_from_slice(&self.buffer[self.ri..self.len]);
            self.buffer = grown;
        } else {
            self.buffer.copy_within(self.ri..self.len, 0);
        }

        self.len = unread;
        self.ri = 0;
    }

    /// Drop all buffered data (used when a new transport is attached).
    pub fn clear(&mut self) {
        self.len = 0;
        self.ri = 0;
    }
}

impl Default for ByteQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── SendQueue ────────────────────────────────────────────────────

/// Append-only outgoing buffer. Strictly push + flush-all: there is no read
/// cursor. The owning socket decides *when* to flush; this type only answers
/// whether an append still fits and hands over the accumulated bytes.
#[derive(Debug)]
pub struct SendQueue {
    buffer: Vec<u8>,
    len: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; SEND_CAPACITY],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether appending `extra` bytes would overflow current capacity.
    pub fn fits(&self, extra: usize) -> bool {
        self.len + extra <= self.buffer.len()
    }

    /// Grow geometrically until a single append of `extra` bytes fits an
    /// empty buffer. Used when one push is larger than the whole queue.
    pub fn grow_for(&mut self, extra: usize) {
        let mut capacity = self.buffer.len();
        while capacity < extra {
            capacity *= 2;
        }
        self.buffer.resize(capacity, 0);
    }

    pub fn push(&mut self, data: &[u8]) {
        debug_assert!(self.fits(data.len()));
        self.buffer[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
    }

    /// Take everything accumulated so far as one write, resetting length.
    pub fn drain(&mut self) -> Bytes {
        let out = Bytes::copy_from_slice(&self.buffer[..self.len]);
        self.len = 0;
        out
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(data: &[u8]) -> ByteQueue {
        let mut q = ByteQueue::new();
        q.append(data);
        q
    }

    #[test]
    fn peek_does_not_consume() {
        let q = queue_with(&[0xab, 0xcd]);
        assert_eq!(q.peek8(), 0xab);
        assert_eq!(q.peek8(), 0xab);
        assert_eq!(q.peek_bytes(2), &[0xab, 0xcd]);
        assert_eq!(q.peek_bytes(2), &[0xab, 0xcd]);
    }

    #[test]
    fn shifts_are_big_endian() {
        let mut q = queue_with(&[0xab, 0xcd, 0x12, 0x34, 0x88, 0xee, 0x11, 0x33]);
        assert_eq!(q.shift16(), 0xabcd);
        assert_eq!(q.shift16(), 0x1234);
        assert_eq!(q.shift32(), 0x88ee1133);
    }

    #[test]
    fn shift_bytes_consumes_in_order() {
        let mut q = queue_with(&[0xab, 0xcd, 0x12, 0x34, 0x88, 0xee, 0x11, 0x33]);
        assert_eq!(q.shift_bytes(4), vec![0xab, 0xcd, 0x12, 0x34]);
        assert_eq!(q.shift_bytes(4), vec![0x88, 0xee, 0x11, 0x33]);
        assert!(q.is_empty());
    }

    #[test]
    fn shift_into_avoids_allocation() {
        let mut q = queue_with(&[1, 2, 3, 4, 5]);
        let mut out = [0u8; 3];
        q.shift_into(&mut out);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn wait_without_lookback() {
        let mut q = queue_with(&[0; 8]);
        assert!(q.wait(9, 0));
        assert!(!q.wait(8, 0));
    }

    #[test]
    fn wait_rewinds_by_lookback_on_insufficient_data() {
        let mut q = queue_with(&[0xab, 0xcd, 0x12, 0x34, 0x88, 0xee, 0x11, 0x33]);
        assert_eq!(q.shift32(), 0xabcd1234);
        assert!(q.wait(8, 2));
        // Cursor moved two bytes back: re-reads 0x1234 before the rest.
        assert_eq!(q.shift32(), 0x123488ee);
    }

    #[test]
    fn wait_does_not_rewind_when_data_is_available() {
        let mut q = queue_with(&[0xab, 0xcd, 0x12, 0x34, 0x88, 0xee, 0x11, 0x33]);
        assert_eq!(q.shift32(), 0xabcd1234);
        assert!(!q.wait(4, 2));
        assert_eq!(q.shift32(), 0x88ee1133);
    }

    #[test]
    #[should_panic(expected = "cannot rewind")]
    fn wait_panics_on_over_rewind() {
        let mut q = queue_with(&[0xab, 0xcd, 0x12, 0x34, 0x88, 0xee, 0x11, 0x33]);
        q.shift32();
        q.wait(8, 6);
    }

    #[test]
    fn append_grows_past_initial_capacity() {
        let mut q = ByteQueue::new();
        let big = vec![0x5a; RECEIVE_CAPACITY * 2];
        q.append(&big);
        assert_eq!(q.len(), big.len());
        assert_eq!(q.shift_bytes(big.len()), big);
    }

    #[test]
    fn append_compacts_after_drain() {
        let mut q = queue_with(&[1, 2, 3]);
        q.skip_bytes(3);
        q.append(&[4, 5]);
        // Fully drained before the append, so no rewindable history remains.
        assert_eq!(q.shift8(), 4);
        assert_eq!(q.shift8(), 5);
    }

    #[test]
    fn growth_preserves_unread_bytes() {
        let mut q = ByteQueue::new();
        q.append(&[9; 16]);
        q.skip_bytes(8);
        let big = vec![0x7f; RECEIVE_CAPACITY * 2];
        q.append(&big);
        assert_eq!(q.len(), 8 + big.len());
        assert_eq!(q.shift_bytes(8), vec![9; 8]);
        assert_eq!(q.shift8(), 0x7f);
    }

    #[test]
    fn send_queue_accumulates_and_drains() {
        let mut sq = SendQueue::new();
        sq.push(&[1, 2]);
        sq.push(&[3]);
        assert_eq!(sq.len(), 3);
        assert_eq!(&sq.drain()[..], &[1, 2, 3]);
        assert!(sq.is_empty());
    }

    #[test]
    fn send_queue_grows_for_oversized_push() {
        let mut sq = SendQueue::new();
        let big = vec![0xcc; SEND_CAPACITY * 3];
        assert!(!sq.fits(big.len()));
        sq.grow_for(big.len());
        assert!(sq.fits(big.len()));
        sq.push(&big);
        assert_eq!(&sq.drain()[..], &big[..]);
    }
}
