//! Stream identity, pixel layouts and negotiated profiles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which physical sensor a channel carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Color,
    Depth,
}

impl StreamKind {
    /// Both stream kinds, in start order.
    pub const ALL: [StreamKind; 2] = [StreamKind::Color, StreamKind::Depth];
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Color => f.write_str("color"),
            StreamKind::Depth => f.write_str("depth"),
        }
    }
}

/// Pixel layout of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit blue, green, red, padding
    Bgrx,
    /// 8-bit red, green, blue, padding
    Rgbx,
    /// 8-bit luminance
    Gray,
    /// 32-bit float per pixel (depth in millimetres, IR intensity)
    Float32,
    /// Compressed or device-specific bytes with no fixed pixel size
    Raw,
}

impl PixelFormat {
    /// Bytes per pixel, or 0 for `Raw`.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgrx | PixelFormat::Rgbx | PixelFormat::Float32 => 4,
            PixelFormat::Gray => 1,
            PixelFormat::Raw => 0,
        }
    }
}

/// Stream parameters a session asks the device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: u32,
}

impl StreamRequest {
    /// Native Kinect v2 geometry: 1920x1080 BGRX color, 512x424 float depth,
    /// both at 30 Hz.
    pub fn kinect_v2(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Color => {
                Self { width: 1920, height: 1080, pixel_format: PixelFormat::Bgrx, fps: 30 }
            }
            StreamKind::Depth => {
                Self { width: 512, height: 424, pixel_format: PixelFormat::Float32, fps: 30 }
            }
        }
    }
}

/// Stream parameters the device agreed to during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub kind: StreamKind,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: u32,
}

impl StreamProfile {
    /// Accept a request as-is.
    pub fn from_request(kind: StreamKind, request: &StreamRequest) -> Self {
        Self {
            kind,
            width: request.width,
            height: request.height,
            pixel_format: request.pixel_format,
            fps: request.fps,
        }
    }

    /// Payload size of one frame, if the pixel format is fixed-size.
    pub fn frame_len(&self) -> Option<usize> {
        match self.pixel_format.bytes_per_pixel() {
            0 => None,
            bpp => Some(self.width as usize * self.height as usize * bpp),
        }
    }
}
