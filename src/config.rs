//! Session configuration
//!
//! [`SessionConfig`] carries every tunable the registry and sessions use. It
//! deserializes from YAML with all fields optional:
//!
//! ```rust
//! use depthcam::SessionConfig;
//! use std::time::Duration;
//!
//! let config = SessionConfig::from_yaml_str(
//!     "connect_timeout_ms: 2500\ndepth:\n  width: 512\n  height: 424\n  pixel_format: float32\n  fps: 15\n",
//! )?;
//! assert_eq!(config.connect_timeout(), Duration::from_millis(2500));
//! assert_eq!(config.depth.fps, 15);
//! # Ok::<(), depthcam::DeviceError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::types::{StreamKind, StreamRequest};
use crate::{DeviceError, Result};

/// Tunables for discovery, connection and capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound on one enumeration pass
    pub discovery_timeout_ms: u64,

    /// Upper bound on open + negotiate + stream start
    pub connect_timeout_ms: u64,

    /// Upper bound on waiting for capture tasks to stop during disconnect
    pub disconnect_timeout_ms: u64,

    /// Requested color stream
    pub color: StreamRequest,

    /// Requested depth stream
    pub depth: StreamRequest,

    /// Consecutive capture errors tolerated before the session fails
    pub max_consecutive_capture_errors: u32,

    /// Base delay of the exponential backoff between capture retries
    pub capture_backoff_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            disconnect_timeout_ms: 1_000,
            color: StreamRequest::kinect_v2(StreamKind::Color),
            depth: StreamRequest::kinect_v2(StreamKind::Depth),
            max_consecutive_capture_errors: 10,
            capture_backoff_ms: 50,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml_ng::from_str(yaml)
            .map_err(|e| DeviceError::config(format!("YAML parse failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading session config from {}", path.display());
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| DeviceError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&yaml)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.discovery_timeout_ms == 0 {
            return Err(DeviceError::config("discovery_timeout_ms must be greater than 0"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(DeviceError::config("connect_timeout_ms must be greater than 0"));
        }
        if self.max_consecutive_capture_errors == 0 {
            return Err(DeviceError::config("max_consecutive_capture_errors must be at least 1"));
        }
        for kind in StreamKind::ALL {
            let request = self.request(kind);
            if request.width == 0 || request.height == 0 {
                return Err(DeviceError::config(format!("{} stream has an empty resolution", kind)));
            }
            if request.fps == 0 {
                return Err(DeviceError::config(format!("{} stream fps must be greater than 0", kind)));
            }
        }
        Ok(())
    }

    /// Requested parameters for one stream.
    pub fn request(&self, kind: StreamKind) -> &StreamRequest {
        match kind {
            StreamKind::Color => &self.color,
            StreamKind::Depth => &self.depth,
        }
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based): base, 2x base, 4x base,
    /// capped at 32x base.
    pub fn capture_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(5);
        Duration::from_millis(self.capture_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelFormat;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SessionConfig::from_yaml_str("{}").expect("empty mapping should parse");
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn partial_stream_override() {
        let yaml = "color:\n  width: 1280\n  height: 720\n  pixel_format: rgbx\n  fps: 15\n";
        let config = SessionConfig::from_yaml_str(yaml).expect("valid config");

        assert_eq!(config.color.width, 1280);
        assert_eq!(config.color.pixel_format, PixelFormat::Rgbx);
        assert_eq!(config.depth, StreamRequest::kinect_v2(StreamKind::Depth));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SessionConfig::from_yaml_str("connect_timeout: 5").unwrap_err();
        assert!(matches!(err, DeviceError::Config { .. }));
    }

    #[test]
    fn zero_timeouts_fail_validation() {
        let err = SessionConfig::from_yaml_str("connect_timeout_ms: 0").unwrap_err();
        assert!(err.to_string().contains("connect_timeout_ms"));
    }

    #[test]
    fn zero_fps_fails_validation() {
        let mut config = SessionConfig::default();
        config.depth.fps = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("depth"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SessionConfig::default();
        assert_eq!(config.capture_backoff(1), Duration::from_millis(50));
        assert_eq!(config.capture_backoff(2), Duration::from_millis(100));
        assert_eq!(config.capture_backoff(3), Duration::from_millis(200));
        assert_eq!(config.capture_backoff(20), Duration::from_millis(1600));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "discovery_timeout_ms: 750").expect("write config");

        let config = SessionConfig::from_path(file.path()).expect("config should load");
        assert_eq!(config.discovery_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SessionConfig::from_path("/nonexistent/depthcam.yaml").unwrap_err();
        assert!(matches!(err, DeviceError::Io { .. }));
    }
}
