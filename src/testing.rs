//! Shared test doubles: a scripted transport, a recording display and a
//! synchronous video backend.
//!
//! Lives in the crate (not `tests/`) so unit tests and integration suites
//! use the same doubles.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::decoders::DecoderRegistry;
use crate::display::Display;
use crate::error::RfbError;
use crate::socket::{ReadyState, Socket, Transport, TransportEvent};
use crate::video::{EncodedChunk, PendingFrame, VideoBackend, VideoConfig, VideoFrame};

// ── ScriptedTransport ────────────────────────────────────────────

#[derive(Default)]
struct ScriptedInner {
    sent: Vec<u8>,
    state: Option<ReadyState>,
}

/// Transport double: records sent bytes, reports a settable ready state.
/// Clones share state, so a test keeps one handle while the socket owns
/// the other.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedInner {
                sent: Vec::new(),
                state: Some(ReadyState::Open),
            })),
        }
    }

    /// Everything the socket has flushed so far, in order.
    pub fn sent(&self) -> Vec<u8> {
        self.inner.lock().expect("transport lock").sent.clone()
    }

    pub fn set_state(&self, state: ReadyState) {
        self.inner.lock().expect("transport lock").state = Some(state);
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), RfbError> {
        self.inner
            .lock()
            .expect("transport lock")
            .sent
            .extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self, _code: Option<u16>, _reason: &str) {
        self.inner.lock().expect("transport lock").state = Some(ReadyState::Closed);
    }

    fn ready_state(&self) -> ReadyState {
        self.inner
            .lock()
            .expect("transport lock")
            .state
            .unwrap_or(ReadyState::Unknown)
    }
}

// ── Socket helpers ───────────────────────────────────────────────

/// A socket with a scripted transport attached and `data` already queued.
pub fn socket_with_data(data: &[u8]) -> Socket {
    let mut sock = Socket::new();
    sock.attach(Box::new(ScriptedTransport::new()));
    feed(&mut sock, data);
    sock
}

/// Queue more incoming bytes on a test socket.
pub fn feed(sock: &mut Socket, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    sock.handle_event(TransportEvent::Message(Bytes::copy_from_slice(data)));
}

// ── RecordingDisplay ─────────────────────────────────────────────

/// One recorded display operation.
#[derive(Debug, Clone)]
pub enum DisplayCall {
    FillRect { x: u32, y: u32, width: u32, height: u32, color: [u8; 3] },
    BlitImage { x: u32, y: u32, width: u32, height: u32, pixels: Vec<u8>, offset: usize },
    CopyImage { old_x: u32, old_y: u32, new_x: u32, new_y: u32, width: u32, height: u32 },
    ImageRect { x: u32, y: u32, width: u32, height: u32, mime: String, data: Vec<u8> },
    VideoFrame { x: u32, y: u32, width: u32, height: u32, frame: PendingFrame },
}

impl PartialEq for DisplayCall {
    fn eq(&self, other: &Self) -> bool {
        use DisplayCall::*;
        match (self, other) {
            (
                FillRect { x, y, width, height, color },
                FillRect { x: x2, y: y2, width: w2, height: h2, color: c2 },
            ) => (x, y, width, height, color) == (x2, y2, w2, h2, c2),
            (
                BlitImage { x, y, width, height, pixels, offset },
                BlitImage { x: x2, y: y2, width: w2, height: h2, pixels: p2, offset: o2 },
            ) => (x, y, width, height, pixels, offset) == (x2, y2, w2, h2, p2, o2),
            (
                CopyImage { old_x, old_y, new_x, new_y, width, height },
                CopyImage { old_x: a, old_y: b, new_x: c, new_y: d, width: e, height: f },
            ) => (old_x, old_y, new_x, new_y, width, height) == (a, b, c, d, e, f),
            (
                ImageRect { x, y, width, height, mime, data },
                ImageRect { x: x2, y: y2, width: w2, height: h2, mime: m2, data: d2 },
            ) => (x, y, width, height, mime, data) == (x2, y2, w2, h2, m2, d2),
            // Pending frames compare by slot identity.
            (VideoFrame { frame, .. }, VideoFrame { frame: f2, .. }) => Arc::ptr_eq(frame, f2),
            _ => false,
        }
    }
}

/// Display double that records every call for assertions.
#[derive(Default)]
pub struct RecordingDisplay {
    pub calls: Vec<DisplayCall>,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for RecordingDisplay {
    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 3]) {
        self.calls.push(DisplayCall::FillRect { x, y, width, height, color });
    }

    fn blit_image(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u8], offset: usize) {
        self.calls.push(DisplayCall::BlitImage {
            x,
            y,
            width,
            height,
            pixels: pixels.to_vec(),
            offset,
        });
    }

    fn copy_image(&mut self, old_x: u32, old_y: u32, new_x: u32, new_y: u32, width: u32, height: u32) {
        self.calls.push(DisplayCall::CopyImage { old_x, old_y, new_x, new_y, width, height });
    }

    fn image_rect(&mut self, x: u32, y: u32, width: u32, height: u32, mime: &str, data: &[u8]) {
        self.calls.push(DisplayCall::ImageRect {
            x,
            y,
            width,
            height,
            mime: mime.to_string(),
            data: data.to_vec(),
        });
    }

    fn video_frame(&mut self, x: u32, y: u32, width: u32, height: u32, frame: PendingFrame) {
        self.calls.push(DisplayCall::VideoFrame { x, y, width, height, frame });
    }
}

// ── FramebufferDisplay ───────────────────────────────────────────

/// Display double that actually renders into an RGBA buffer, for
/// end-to-end pixel assertions.
pub struct FramebufferDisplay {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FramebufferDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        ((y * self.width + x) * 4) as usize
    }
}

impl Display for FramebufferDisplay {
    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 3]) {
        for row in y..y + height {
            for col in x..x + width {
                let o = self.offset(col, row);
                self.pixels[o..o + 3].copy_from_slice(&color);
                self.pixels[o + 3] = 255;
            }
        }
    }

    fn blit_image(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u8], offset: usize) {
        for row in 0..height {
            for col in 0..width {
                let src = offset + ((row * width + col) * 4) as usize;
                let dst = self.offset(x + col, y + row);
                self.pixels[dst..dst + 4].copy_from_slice(&pixels[src..src + 4]);
            }
        }
    }

    fn copy_image(&mut self, old_x: u32, old_y: u32, new_x: u32, new_y: u32, width: u32, height: u32) {
        let mut region = Vec::with_capacity((width * height * 4) as usize);
        for row in 0..height {
            for col in 0..width {
                let o = self.offset(old_x + col, old_y + row);
                region.extend_from_slice(&self.pixels[o..o + 4]);
            }
        }
        self.blit_image(new_x, new_y, width, height, &region, 0);
    }

    fn image_rect(&mut self, _x: u32, _y: u32, _w: u32, _h: u32, _mime: &str, _data: &[u8]) {
        // Image rasterization is out of scope for the test framebuffer.
    }

    fn video_frame(&mut self, _x: u32, _y: u32, _w: u32, _h: u32, _frame: PendingFrame) {
        // Video compositing is out of scope for the test framebuffer.
    }
}

// ── TestVideoBackend ─────────────────────────────────────────────

/// Backend double that "decodes" synchronously: each submitted chunk
/// completes on the next poll with the chunk bytes echoed as frame data.
pub struct TestVideoBackend {
    configured: Option<VideoConfig>,
    finished: Vec<VideoFrame>,
    pub submitted: usize,
}

impl TestVideoBackend {
    pub fn new() -> Self {
        Self {
            configured: None,
            finished: Vec::new(),
            submitted: 0,
        }
    }
}

impl Default for TestVideoBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoBackend for TestVideoBackend {
    fn configure(&mut self, config: &VideoConfig) -> Result<(), RfbError> {
        self.configured = Some(*config);
        Ok(())
    }

    fn configured(&self) -> bool {
        self.configured.is_some()
    }

    fn submit(&mut self, chunk: EncodedChunk<'_>) -> Result<(), RfbError> {
        self.submitted += 1;
        self.finished.push(VideoFrame {
            timestamp: chunk.timestamp,
            data: Bytes::copy_from_slice(chunk.data),
        });
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<VideoFrame>, RfbError> {
        Ok(std::mem::take(&mut self.finished))
    }
}

// ── Registry helpers ─────────────────────────────────────────────

/// Factory producing one [`TestVideoBackend`] per decode context.
pub fn test_video_factory() -> crate::video::VideoBackendFactory {
    Box::new(|| Box::new(TestVideoBackend::new()) as Box<dyn VideoBackend>)
}

/// A full decoder registry wired to the test video backend.
pub fn test_registry() -> DecoderRegistry {
    DecoderRegistry::new(test_video_factory())
}
