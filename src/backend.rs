//! Backend traits for device enumeration and frame capture

use crate::Result;
use crate::types::{Device, Frame, StreamKind, StreamProfile, StreamRequest};

/// Source of devices: the enumeration primitive plus the ability to open one.
///
/// Backends are opaque collaborators. A USB backend, a network bridge or the
/// built-in [`SimulatedBackend`](crate::providers::SimulatedBackend) all look
/// the same to the registry and sessions.
#[async_trait::async_trait]
pub trait DeviceBackend: Send + Sync + 'static {
    /// Enumerate currently attached devices.
    ///
    /// Returns `Err(DeviceError::Discovery { .. })` when the enumeration
    /// subsystem itself is unavailable. An empty list is not an error.
    async fn enumerate(&self) -> Result<Vec<Device>>;

    /// Open an exclusive handle to a device.
    ///
    /// Fails with `DeviceBusy` when the device is owned outside this process
    /// and `DeviceUnreachable` on I/O failure.
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceHandle>>;
}

/// An open device.
///
/// The session calls [`release`](DeviceHandle::release) exactly once for every
/// handle it obtained, on every exit path, including when the connect future
/// is dropped mid-flight. `release` is synchronous so it can run from `Drop`.
#[async_trait::async_trait]
pub trait DeviceHandle: Send + 'static {
    /// Agree on stream parameters. Returns one profile per requested stream,
    /// in the same order.
    async fn negotiate(&mut self, requests: &[(StreamKind, StreamRequest)])
    -> Result<Vec<StreamProfile>>;

    /// Start one stream and hand back its capture source.
    async fn start_capture(&mut self, profile: &StreamProfile) -> Result<Box<dyn FrameCapture>>;

    /// Stop all running streams. Called on orderly disconnect before release.
    async fn stop(&mut self) -> Result<()>;

    /// Give the device back.
    fn release(&mut self);
}

/// Producer side of one stream.
#[async_trait::async_trait]
pub trait FrameCapture: Send + 'static {
    /// Wait for the next frame.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Stream ended (device gone)
    /// - `Err(e)` - Transient capture error; the caller decides whether to retry
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}
