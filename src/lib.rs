//! Async session manager for depth cameras.
//!
//! depthcam discovers attached depth cameras, manages the connection
//! lifecycle of one device per session, and delivers the latest color and
//! depth frames to any number of consumers without ever blocking capture.
//!
//! # Features
//!
//! - **Discovery**: lazy, restartable device enumeration with a bounded timeout
//! - **Sessions**: an explicit, observable state machine with guaranteed
//!   handle release on every exit path, including cancellation
//! - **Latest-frame delivery**: single-slot channels that drop stale frames
//!   and count them instead of queueing
//! - **Pluggable backends**: USB stacks, network bridges or the built-in
//!   simulator implement the same async traits
//!
//! ## Example (simulated Kinect v2)
//!
//! ```rust,no_run
//! use depthcam::{DepthCam, StreamKind};
//!
//! #[tokio::main]
//! async fn main() -> depthcam::Result<()> {
//!     let registry = DepthCam::simulated();
//!
//!     let Some(device) = registry.find_by_serial("1234567890").await? else {
//!         return Ok(());
//!     };
//!     let session = registry.session(device);
//!
//!     session.connect().await?;
//!     tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     if let Some(frame) = session.latest(StreamKind::Color) {
//!         println!("color {}x{}", frame.width, frame.height);
//!     }
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Discovery, sessions and frame delivery
pub mod backend;
pub mod channel;
mod driver;
pub mod registry;
pub mod session;
pub mod stream;

// Device backends
pub mod providers;

// Core exports
pub use error::*;
pub use types::*;

// Main API exports
pub use backend::{DeviceBackend, DeviceHandle, FrameCapture};
pub use channel::{ChannelStats, FrameChannel};
pub use config::SessionConfig;
pub use providers::SimulatedBackend;
pub use registry::DeviceRegistry;
pub use session::{DeviceSession, UNCONNECTED_SERIAL};

/// Unified entry point for building a [`DeviceRegistry`].
///
/// # Examples
///
/// ## Simulated device
/// ```rust,no_run
/// use depthcam::DepthCam;
///
/// #[tokio::main]
/// async fn main() -> depthcam::Result<()> {
///     let registry = DepthCam::simulated();
///     for device in registry.enumerate().await? {
///         println!("{}", device);
///     }
///     Ok(())
/// }
/// ```
///
/// ## Custom backend with configuration
/// ```rust,no_run
/// use depthcam::{DepthCam, SessionConfig, SimulatedBackend};
///
/// # fn main() -> depthcam::Result<()> {
/// let config = SessionConfig::from_yaml_str("connect_timeout_ms: 2000")?;
/// let registry = DepthCam::with_config(SimulatedBackend::new(), config)?;
/// # Ok(())
/// # }
/// ```
pub struct DepthCam;

impl DepthCam {
    /// Registry over the built-in simulator: one Kinect v2, serial
    /// `1234567890`, one second to open.
    pub fn simulated() -> DeviceRegistry {
        DeviceRegistry::new(SimulatedBackend::new())
    }

    /// Registry over any backend with the default configuration.
    pub fn registry<B: DeviceBackend>(backend: B) -> DeviceRegistry {
        DeviceRegistry::new(backend)
    }

    /// Registry over any backend with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Config` if the configuration is invalid.
    pub fn with_config<B: DeviceBackend>(backend: B, config: SessionConfig) -> Result<DeviceRegistry> {
        DeviceRegistry::with_config(backend, config)
    }

    /// Registry configured from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Io` if the file cannot be read and
    /// `DeviceError::Config` if it does not parse or validate.
    pub fn from_config_file<B, P>(backend: B, path: P) -> Result<DeviceRegistry>
    where
        B: DeviceBackend,
        P: AsRef<std::path::Path>,
    {
        let config = SessionConfig::from_path(path)?;
        DeviceRegistry::with_config(backend, config)
    }
}
