//! Delivery rate control for frame subscriptions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a subscriber wants to be woken with a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the stream produces (the negotiated fps)
    Native,

    /// At most this many frames per second, latest wins.
    /// Requests at or above the stream's fps collapse to `Native`.
    Max(u32),
}

impl UpdateRate {
    /// Normalize against the stream's frame rate.
    pub fn normalize(self, stream_fps: u32) -> Self {
        match self {
            UpdateRate::Native => UpdateRate::Native,
            UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(hz) if hz >= stream_fps => UpdateRate::Native,
            UpdateRate::Max(hz) => UpdateRate::Max(hz),
        }
    }

    /// Minimum spacing between deliveries, if throttling applies.
    pub fn throttle_interval(self, stream_fps: u32) -> Option<Duration> {
        match self.normalize(stream_fps) {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
