//! Frame type delivered through frame channels

use std::sync::Arc;
use std::time::Duration;

use super::{PixelFormat, StreamKind, StreamProfile};

/// A single captured image from one stream.
///
/// This is the unit that flows from a capture task through a
/// [`FrameChannel`](crate::FrameChannel) to consumers. The payload is shared,
/// never copied, once the frame has been built.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Stream the frame was captured on
    pub kind: StreamKind,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Layout of each pixel in `payload`
    pub pixel_format: PixelFormat,

    /// Device timestamp, relative to the start of capture
    pub timestamp: Duration,

    /// Device sequence number
    pub sequence: u32,

    /// Image bytes (zero-copy via Arc)
    pub payload: Arc<[u8]>,
}

impl Frame {
    pub fn new(
        kind: StreamKind,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp: Duration,
        sequence: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self { kind, width, height, pixel_format, timestamp, sequence, payload: payload.into() }
    }

    /// Number of payload bytes the geometry and pixel format call for, if the
    /// format has a fixed pixel size.
    pub fn expected_len(&self) -> Option<usize> {
        match self.pixel_format.bytes_per_pixel() {
            0 => None,
            bpp => Some(self.width as usize * self.height as usize * bpp),
        }
    }

    /// Whether this frame is what a stream negotiated as `profile` produces:
    /// same stream, geometry and pixel format, and a payload of the
    /// profile's frame size.
    pub fn matches(&self, profile: &StreamProfile) -> bool {
        self.kind == profile.kind
            && self.width == profile.width
            && self.height == profile.height
            && self.pixel_format == profile.pixel_format
            && profile.frame_len().is_none_or(|len| self.payload.len() == len)
    }

    /// Whether the payload matches the declared geometry.
    ///
    /// Compressed (`Raw`) payloads cannot be checked and are accepted.
    pub fn is_well_formed(&self) -> bool {
        match self.expected_len() {
            Some(len) => self.payload.len() == len,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth_profile(width: u32, height: u32) -> StreamProfile {
        StreamProfile { kind: StreamKind::Depth, width, height, pixel_format: PixelFormat::Float32, fps: 30 }
    }

    fn depth_frame(width: u32, height: u32) -> Frame {
        let len = (width * height) as usize * 4;
        Frame::new(StreamKind::Depth, width, height, PixelFormat::Float32, Duration::ZERO, 1, vec![0; len])
    }

    #[test]
    fn frame_must_match_negotiated_geometry() {
        let profile = depth_profile(512, 424);

        assert!(depth_frame(512, 424).matches(&profile));

        // Self-consistent, but not what was negotiated
        let small = depth_frame(2, 2);
        assert!(small.is_well_formed());
        assert!(!small.matches(&profile));
    }

    #[test]
    fn frame_must_match_negotiated_format_and_size() {
        let profile = depth_profile(2, 2);

        let mut truncated = depth_frame(2, 2);
        truncated.payload = vec![0u8; 15].into();
        assert!(!truncated.matches(&profile));

        let mut gray = depth_frame(2, 2);
        gray.pixel_format = PixelFormat::Gray;
        assert!(!gray.matches(&profile));

        let mut color = depth_frame(2, 2);
        color.kind = StreamKind::Color;
        assert!(!color.matches(&profile));
    }

    #[test]
    fn raw_profiles_check_geometry_only() {
        let profile = StreamProfile { pixel_format: PixelFormat::Raw, ..depth_profile(4, 4) };
        let frame = Frame::new(StreamKind::Depth, 4, 4, PixelFormat::Raw, Duration::ZERO, 1, vec![1, 2, 3]);
        assert!(frame.matches(&profile));
    }
}
