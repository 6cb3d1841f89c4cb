//! Core types shared by the registry, sessions and frame channels.
//!
//! ## Architecture
//!
//! - [`Device`] identifies an attached camera by serial number
//! - [`Frame`] is one immutable capture from a single stream, shared via `Arc`
//! - [`StreamKind`], [`PixelFormat`], [`StreamRequest`] and [`StreamProfile`]
//!   describe what a stream carries before and after negotiation
//! - [`ConnectionState`] is the session state machine
//! - [`UpdateRate`] controls how often a subscriber is woken
//!
//! ## Usage Example
//!
//! ```rust
//! use depthcam::types::{Frame, PixelFormat, StreamKind};
//! use std::time::Duration;
//!
//! let payload = vec![0u8; 4 * 2 * 2];
//! let frame = Frame::new(StreamKind::Depth, 2, 2, PixelFormat::Float32, Duration::ZERO, 1, payload);
//! assert!(frame.is_well_formed());
//! ```

mod device;
mod frame;
mod state;
mod stream_kind;
mod update_rate;

pub use device::{Device, KINECT_V2_PRODUCT_ID, MICROSOFT_VENDOR_ID};
pub use frame::Frame;
pub use state::ConnectionState;
pub use stream_kind::{PixelFormat, StreamKind, StreamProfile, StreamRequest};
pub use update_rate::UpdateRate;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn arb_format() -> impl Strategy<Value = PixelFormat> {
        prop::sample::select(vec![
            PixelFormat::Bgrx,
            PixelFormat::Rgbx,
            PixelFormat::Gray,
            PixelFormat::Float32,
        ])
    }

    proptest! {
        #[test]
        fn prop_payload_length_decides_well_formedness(
            width in 1u32..64,
            height in 1u32..64,
            format in arb_format(),
            skew in 1usize..16
        ) {
            let expected = width as usize * height as usize * format.bytes_per_pixel();

            let exact = Frame::new(StreamKind::Color, width, height, format, Duration::ZERO, 0, vec![0u8; expected]);
            prop_assert!(exact.is_well_formed());

            let short = Frame::new(StreamKind::Color, width, height, format, Duration::ZERO, 0, vec![0u8; expected - 1]);
            prop_assert!(!short.is_well_formed());

            let long = Frame::new(StreamKind::Color, width, height, format, Duration::ZERO, 0, vec![0u8; expected + skew]);
            prop_assert!(!long.is_well_formed());
        }
    }

    #[test]
    fn raw_frames_accept_any_payload() {
        let frame =
            Frame::new(StreamKind::Color, 1920, 1080, PixelFormat::Raw, Duration::ZERO, 0, vec![1, 2, 3]);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn kinect_defaults_match_sensor_geometry() {
        let color = StreamRequest::kinect_v2(StreamKind::Color);
        let depth = StreamRequest::kinect_v2(StreamKind::Depth);

        assert_eq!((color.width, color.height), (1920, 1080));
        assert_eq!(color.pixel_format, PixelFormat::Bgrx);
        assert_eq!((depth.width, depth.height), (512, 424));
        assert_eq!(depth.pixel_format, PixelFormat::Float32);
    }
}
