//! Error types for device discovery, sessions and capture.
//!
//! Every fallible operation in the crate returns [`DeviceError`]. The variants
//! follow the failure taxonomy of a device session:
//!
//! - **Discovery**: the enumeration backend is unavailable (retry discovery)
//! - **Caller errors**: [`DeviceError::DeviceBusy`], [`DeviceError::AlreadyInProgress`],
//!   [`DeviceError::InvalidState`] (surfaced immediately, retrying will not help)
//! - **Transient I/O**: [`DeviceError::DeviceUnreachable`], [`DeviceError::Timeout`]
//!   (the caller may retry `connect`)
//! - **Fatal**: [`DeviceError::Negotiation`] and capture loss, which leave the
//!   session in `Failed` until the caller disconnects
//!
//! The library never retries a connect or discovery on its own; use
//! [`DeviceError::is_retryable`] to drive your own policy:
//!
//! ```rust
//! use depthcam::DeviceError;
//!
//! let error = DeviceError::unreachable("usb transfer stalled");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{ConnectionState, StreamKind};

/// Result type alias for device operations.
pub type Result<T, E = DeviceError> = std::result::Result<T, E>;

/// Main error type for device operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DeviceError {
    #[error("Device discovery unavailable: {reason}")]
    Discovery {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Device {serial} is already owned by another session")]
    DeviceBusy { serial: String },

    #[error("A connect is already in progress for device {serial}")]
    AlreadyInProgress { serial: String },

    #[error("Device {serial} unreachable: {reason}")]
    DeviceUnreachable {
        serial: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: &'static str, duration: Duration },

    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },

    #[error("Cannot {operation} while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("Stream negotiation failed for {kind}: {reason}")]
    Negotiation { kind: StreamKind, reason: String },

    #[error("{kind} capture failed: {reason}")]
    Capture { kind: StreamKind, reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Configuration file error: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeviceError {
    /// Returns whether the failed operation may succeed if the caller retries it.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::Discovery { .. } => true,
            DeviceError::DeviceUnreachable { .. } => true,
            DeviceError::Timeout { .. } => true,
            DeviceError::Capture { .. } => true,
            DeviceError::Cancelled { .. } => true,
            DeviceError::DeviceBusy { .. } => false,
            DeviceError::AlreadyInProgress { .. } => false,
            DeviceError::InvalidState { .. } => false,
            DeviceError::Negotiation { .. } => false,
            DeviceError::Config { .. } => false,
            DeviceError::Io { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            DeviceError::Discovery { .. } => vec![
                "Check that the enumeration backend (USB stack, driver) is available",
                "Retry discovery after a short delay",
                "Increase the discovery timeout",
            ],
            DeviceError::DeviceBusy { .. } => vec![
                "Disconnect the other session that owns this device",
                "Select a different device by serial number",
            ],
            DeviceError::AlreadyInProgress { .. } => vec![
                "Wait for the pending connect to finish",
                "Observe state updates instead of calling connect again",
            ],
            DeviceError::DeviceUnreachable { .. } => vec![
                "Check the cable and power supply",
                "Retry connect",
                "Re-plug the device and enumerate again",
            ],
            DeviceError::Timeout { .. } => vec![
                "Retry the operation",
                "Increase the configured timeout",
                "Check that the device is responding",
            ],
            DeviceError::Cancelled { .. } => vec![
                "Connect again once the disconnect has completed",
            ],
            DeviceError::InvalidState { .. } => vec![
                "Check the session state before calling this operation",
                "Call disconnect() to return a failed session to Disconnected",
            ],
            DeviceError::Negotiation { .. } => vec![
                "Request a resolution and pixel format the device supports",
                "Disconnect and reconnect with adjusted stream requests",
            ],
            DeviceError::Capture { .. } => vec![
                "Disconnect and reconnect the session",
                "Check for USB bandwidth contention",
            ],
            DeviceError::Config { .. } => vec![
                "Fix the reported configuration value",
                "Fall back to SessionConfig::default()",
            ],
            DeviceError::Io { .. } => vec![
                "Check the configuration file exists and is readable",
                "Check file permissions",
            ],
        }
    }

    /// Helper constructor for discovery failures.
    pub fn discovery(reason: impl Into<String>) -> Self {
        DeviceError::Discovery { reason: reason.into(), source: None }
    }

    /// Helper constructor for discovery failures with source.
    pub fn discovery_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        DeviceError::Discovery { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I/O failures talking to a device whose serial is
    /// not known to the caller (backends fill the serial in when they can).
    pub fn unreachable(reason: impl Into<String>) -> Self {
        DeviceError::DeviceUnreachable {
            serial: "<unknown>".to_string(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Helper constructor for I/O failures on a specific device.
    pub fn device_unreachable(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::DeviceUnreachable { serial: serial.into(), reason: reason.into(), source: None }
    }

    /// Helper constructor for capture failures.
    pub fn capture_failed(kind: StreamKind, reason: impl Into<String>) -> Self {
        DeviceError::Capture { kind, reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        DeviceError::Config { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn messages_keep_their_context(
            serial in "[0-9]{10}",
            reason in "[a-z ]{1,40}",
            duration_ms in 1u64..60000u64
          ) {
            let unreachable = DeviceError::device_unreachable(serial.clone(), reason.clone());
            let text = unreachable.to_string();
            prop_assert!(text.contains(&serial));
            prop_assert!(text.contains(&reason));

            let busy = DeviceError::DeviceBusy { serial: serial.clone() };
            prop_assert!(busy.to_string().contains(&serial));

            let timeout = DeviceError::Timeout {
              operation: "connect",
              duration: Duration::from_millis(duration_ms),
            };
            prop_assert!(timeout.to_string().starts_with("connect timed out"));
          }
        }
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "libusb missing");
        let error = DeviceError::discovery_with_source("backend unavailable", Box::new(io));

        let source = std::error::Error::source(&error).expect("source should be attached");
        assert_eq!(source.to_string(), "libusb missing");
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<DeviceError>();
    }

    #[test]
    fn retry_classification_follows_taxonomy() {
        assert!(DeviceError::discovery("no backend").is_retryable());
        assert!(DeviceError::unreachable("stall").is_retryable());
        assert!(
            DeviceError::Timeout { operation: "connect", duration: Duration::from_secs(1) }
                .is_retryable()
        );

        assert!(!DeviceError::DeviceBusy { serial: "1".into() }.is_retryable());
        assert!(!DeviceError::AlreadyInProgress { serial: "1".into() }.is_retryable());
        assert!(
            !DeviceError::Negotiation { kind: StreamKind::Depth, reason: "bad".into() }
                .is_retryable()
        );
    }

    #[test]
    fn every_variant_has_suggestions() {
        let errors = vec![
            DeviceError::discovery("x"),
            DeviceError::DeviceBusy { serial: "1".into() },
            DeviceError::AlreadyInProgress { serial: "1".into() },
            DeviceError::unreachable("x"),
            DeviceError::Timeout { operation: "connect", duration: Duration::from_secs(1) },
            DeviceError::Cancelled { operation: "connect" },
            DeviceError::InvalidState {
                operation: "connect",
                state: ConnectionState::Connected,
            },
            DeviceError::Negotiation { kind: StreamKind::Color, reason: "x".into() },
            DeviceError::capture_failed(StreamKind::Color, "x"),
            DeviceError::config("x"),
        ];

        for error in errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error} has no suggestions");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn invalid_state_names_the_state() {
        let error =
            DeviceError::InvalidState { operation: "connect", state: ConnectionState::Failed };
        assert_eq!(error.to_string(), "Cannot connect while Failed");
    }
}
