//! Simulated Kinect v2 backend
//!
//! Stands in for real hardware: one or more devices that take a while to
//! open and then stream synthetic color and depth frames at the negotiated
//! frame rate. Useful for demos, UI work and integration tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use crate::backend::{DeviceBackend, DeviceHandle, FrameCapture};
use crate::types::{Device, Frame, PixelFormat, StreamKind, StreamProfile, StreamRequest};
use crate::{DeviceError, Result};

/// Serial number reported by the default simulated device.
pub const SIMULATED_SERIAL: &str = "1234567890";

/// Backend producing synthetic frames.
///
/// Devices opened through one backend are exclusive: opening a device that
/// another handle still holds fails with `DeviceBusy`, mirroring a USB
/// device claimed by a different process.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    devices: Vec<Device>,
    open_latency: Duration,
    available: bool,
    open_handles: Arc<Mutex<HashSet<String>>>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    /// One Kinect v2 with serial `1234567890` and a one second open latency.
    pub fn new() -> Self {
        Self {
            devices: vec![Device::kinect_v2(SIMULATED_SERIAL)],
            open_latency: Duration::from_secs(1),
            available: true,
            open_handles: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the attached devices.
    pub fn with_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Time `open` takes before the handle is ready.
    pub fn with_open_latency(mut self, latency: Duration) -> Self {
        self.open_latency = latency;
        self
    }

    /// Make enumeration fail as if the USB subsystem were missing.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    /// Whether a handle to `serial` is currently open.
    pub fn is_open(&self, serial: &str) -> bool {
        self.open_handles.lock().unwrap_or_else(PoisonError::into_inner).contains(serial)
    }
}

#[async_trait::async_trait]
impl DeviceBackend for SimulatedBackend {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        if !self.available {
            return Err(DeviceError::discovery("simulated USB subsystem is unavailable"));
        }
        debug!("Simulated enumeration found {} device(s)", self.devices.len());
        Ok(self.devices.clone())
    }

    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceHandle>> {
        if !self.devices.contains(device) {
            return Err(DeviceError::device_unreachable(
                device.serial_number.clone(),
                "device is not attached",
            ));
        }

        tokio::time::sleep(self.open_latency).await;

        let serial = device.serial_number.clone();
        if !self.open_handles.lock().unwrap_or_else(PoisonError::into_inner).insert(serial.clone()) {
            return Err(DeviceError::DeviceBusy { serial });
        }

        info!(serial = %serial, "Simulated device opened");
        Ok(Box::new(SimulatedHandle {
            serial,
            open_handles: Arc::clone(&self.open_handles),
            started: Instant::now(),
            released: false,
        }))
    }
}

struct SimulatedHandle {
    serial: String,
    open_handles: Arc<Mutex<HashSet<String>>>,
    started: Instant,
    released: bool,
}

#[async_trait::async_trait]
impl DeviceHandle for SimulatedHandle {
    async fn negotiate(
        &mut self,
        requests: &[(StreamKind, StreamRequest)],
    ) -> Result<Vec<StreamProfile>> {
        requests
            .iter()
            .map(|(kind, request)| {
                let supported = match kind {
                    StreamKind::Color => {
                        matches!(request.pixel_format, PixelFormat::Bgrx | PixelFormat::Rgbx)
                    }
                    StreamKind::Depth => request.pixel_format == PixelFormat::Float32,
                };
                if !supported {
                    return Err(DeviceError::Negotiation {
                        kind: *kind,
                        reason: format!("{:?} is not produced by this sensor", request.pixel_format),
                    });
                }
                let fps = request.fps.min(30);
                Ok(StreamProfile { fps, ..StreamProfile::from_request(*kind, request) })
            })
            .collect()
    }

    async fn start_capture(&mut self, profile: &StreamProfile) -> Result<Box<dyn FrameCapture>> {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / profile.fps.max(1) as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(serial = %self.serial, stream = %profile.kind, fps = profile.fps, "Simulated stream started");
        Ok(Box::new(SimulatedCapture {
            profile: *profile,
            ticker,
            started: self.started,
            sequence: 0,
        }))
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(serial = %self.serial, "Simulated streams stopped");
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.open_handles.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.serial);
        info!(serial = %self.serial, "Simulated device released");
    }
}

struct SimulatedCapture {
    profile: StreamProfile,
    ticker: Interval,
    started: Instant,
    sequence: u32,
}

impl SimulatedCapture {
    /// Color: horizontal gradient that scrolls with the sequence number.
    /// Depth: a plane receding from 500 mm to 4500 mm across the image.
    fn synthesize(&self) -> Vec<u8> {
        let StreamProfile { width, height, pixel_format, .. } = self.profile;
        let bpp = pixel_format.bytes_per_pixel();
        let mut payload = vec![0u8; width as usize * height as usize * bpp];

        match pixel_format {
            PixelFormat::Float32 => {
                for (index, pixel) in payload.chunks_exact_mut(4).enumerate() {
                    let x = (index % width as usize) as f32;
                    let depth_mm = 500.0 + 4000.0 * x / width.max(1) as f32;
                    pixel.copy_from_slice(&depth_mm.to_le_bytes());
                }
            }
            _ => {
                let shift = self.sequence as usize;
                for (index, pixel) in payload.chunks_exact_mut(bpp.max(1)).enumerate() {
                    let x = index % width as usize;
                    let y = index / width as usize;
                    let value = ((x + shift) % 256) as u8;
                    pixel[0] = value;
                    if bpp >= 4 {
                        pixel[1] = (y % 256) as u8;
                        pixel[2] = 255 - value;
                        pixel[3] = 0xff;
                    }
                }
            }
        }
        payload
    }
}

#[async_trait::async_trait]
impl FrameCapture for SimulatedCapture {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.ticker.tick().await;
        self.sequence = self.sequence.wrapping_add(1);

        let payload = self.synthesize();
        let frame = Frame::new(
            self.profile.kind,
            self.profile.width,
            self.profile.height,
            self.profile.pixel_format,
            self.started.elapsed(),
            self.sequence,
            payload,
        );
        trace!(stream = %self.profile.kind, sequence = self.sequence, "Synthesized frame");
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_request(kind: StreamKind) -> StreamRequest {
        match kind {
            StreamKind::Color => {
                StreamRequest { width: 8, height: 4, pixel_format: PixelFormat::Bgrx, fps: 60 }
            }
            StreamKind::Depth => {
                StreamRequest { width: 8, height: 4, pixel_format: PixelFormat::Float32, fps: 30 }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opened_device_is_exclusive_until_released() {
        let backend = SimulatedBackend::new();
        let device = Device::kinect_v2(SIMULATED_SERIAL);

        let mut handle = backend.open(&device).await.expect("first open succeeds");
        assert!(backend.is_open(SIMULATED_SERIAL));
        assert!(matches!(backend.open(&device).await, Err(DeviceError::DeviceBusy { .. })));

        handle.release();
        assert!(!backend.is_open(SIMULATED_SERIAL));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_device_is_unreachable() {
        let backend = SimulatedBackend::new();
        let result = backend.open(&Device::kinect_v2("nope")).await;
        assert!(matches!(result, Err(DeviceError::DeviceUnreachable { .. })));
    }

    #[tokio::test]
    async fn unavailable_backend_fails_discovery() {
        let backend = SimulatedBackend::new().unavailable();
        assert!(matches!(backend.enumerate().await, Err(DeviceError::Discovery { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_caps_fps_and_checks_formats() {
        let backend = SimulatedBackend::new().with_open_latency(Duration::ZERO);
        let mut handle = backend.open(&Device::kinect_v2(SIMULATED_SERIAL)).await.unwrap();

        let requests: Vec<_> = StreamKind::ALL.iter().map(|k| (*k, small_request(*k))).collect();
        let profiles = handle.negotiate(&requests).await.unwrap();
        assert_eq!(profiles[0].fps, 30);
        assert_eq!(profiles[1].pixel_format, PixelFormat::Float32);

        let bad = [(StreamKind::Depth, StreamRequest { pixel_format: PixelFormat::Gray, ..small_request(StreamKind::Depth) })];
        assert!(matches!(handle.negotiate(&bad).await, Err(DeviceError::Negotiation { .. })));
        handle.release();
    }

    #[tokio::test(start_paused = true)]
    async fn captured_frames_are_well_formed_and_sequenced() {
        let backend = SimulatedBackend::new().with_open_latency(Duration::ZERO);
        let mut handle = backend.open(&Device::kinect_v2(SIMULATED_SERIAL)).await.unwrap();

        for kind in StreamKind::ALL {
            let profile = StreamProfile::from_request(kind, &small_request(kind));
            let mut capture = handle.start_capture(&profile).await.unwrap();

            let first = capture.next_frame().await.unwrap().unwrap();
            let second = capture.next_frame().await.unwrap().unwrap();

            assert!(first.is_well_formed());
            assert_eq!(first.kind, kind);
            assert_eq!(second.sequence, first.sequence + 1);
            assert!(second.timestamp >= first.timestamp);
        }
        handle.release();
    }

    #[tokio::test(start_paused = true)]
    async fn depth_plane_spans_working_range() {
        let backend = SimulatedBackend::new().with_open_latency(Duration::ZERO);
        let mut handle = backend.open(&Device::kinect_v2(SIMULATED_SERIAL)).await.unwrap();
        let profile = StreamProfile::from_request(StreamKind::Depth, &small_request(StreamKind::Depth));
        let mut capture = handle.start_capture(&profile).await.unwrap();

        let frame = capture.next_frame().await.unwrap().unwrap();
        let depths: Vec<f32> = frame
            .payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        assert_eq!(depths[0], 500.0);
        assert!(depths.iter().all(|d| (500.0..4500.0).contains(d)));
        handle.release();
    }
}
