//! The drawing surface decoders blit into.
//!
//! Rendering itself lives outside this crate; decoders only ever see this
//! trait. Pixel data handed to [`Display::blit_image`] is tightly packed
//! RGBA with full opacity already forced by the decoder.

use crate::video::PendingFrame;

/// Drawing operations a decoder may request, in wire order.
pub trait Display {
    /// Fill a solid rectangle with an RGB color.
    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, color: [u8; 3]);

    /// Blit tightly packed RGBA pixels starting at `pixels[offset..]`.
    fn blit_image(&mut self, x: u32, y: u32, width: u32, height: u32, pixels: &[u8], offset: usize);

    /// Copy an already-drawn region to a new position.
    fn copy_image(
        &mut self,
        old_x: u32,
        old_y: u32,
        new_x: u32,
        new_y: u32,
        width: u32,
        height: u32,
    );

    /// Hand over an undecoded image (JPEG/PNG passthrough) for an external
    /// image decoder to rasterize.
    fn image_rect(&mut self, x: u32, y: u32, width: u32, height: u32, mime: &str, data: &[u8]);

    /// Hand over a video frame slot. The frame may still be in flight; the
    /// consumer must check readiness before using the pixels.
    fn video_frame(&mut self, x: u32, y: u32, width: u32, height: u32, frame: PendingFrame);
}
