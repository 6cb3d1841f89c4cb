//! Test utilities: a scriptable in-memory backend
//!
//! [`MockBackend`] counts every handle it hands out and every release it
//! receives, can be told to fail at each step of a connect, and lets tests
//! push frames, errors and end-of-stream into running captures.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::{DeviceBackend, DeviceHandle, FrameCapture};
use crate::config::SessionConfig;
use crate::types::{Device, Frame, PixelFormat, StreamKind, StreamProfile, StreamRequest};
use crate::{DeviceError, Result};

/// Step at which a scripted connect goes wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// `open` reports the device as owned by another process
    Busy,
    /// `open` fails with an I/O error
    Unreachable,
    /// `open` never completes
    Hang,
    /// `negotiate` refuses the depth stream
    RejectNegotiation,
    /// `start_capture` fails for this stream
    FailStart(StreamKind),
}

/// One scripted capture result.
#[derive(Debug)]
pub enum CaptureStep {
    Frame(Frame),
    Error(String),
    End,
}

#[derive(Default)]
struct MockState {
    serials: Vec<String>,
    enumeration_available: bool,
    enumeration_delay: Duration,
    open_delay: Duration,
    negotiate_delay: Duration,
    failure: Option<MockFailure>,
    feeds: HashMap<StreamKind, mpsc::UnboundedSender<CaptureStep>>,
}

#[derive(Default)]
struct MockShared {
    state: Mutex<MockState>,
    enumerations: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    stopped: AtomicUsize,
}

/// In-memory backend with acquire/release accounting.
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<MockShared>,
}

impl MockBackend {
    pub fn with_serials(serials: &[&str]) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state();
            state.serials = serials.iter().map(|s| s.to_string()).collect();
            state.enumeration_available = true;
        }
        backend
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_serials(&self, serials: &[&str]) {
        self.state().serials = serials.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_enumeration_available(&self, available: bool) {
        self.state().enumeration_available = available;
    }

    pub fn set_enumeration_delay(&self, delay: Duration) {
        self.state().enumeration_delay = delay;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        self.state().open_delay = delay;
    }

    /// Delay inside `negotiate`, after the handle has been acquired.
    pub fn set_negotiate_delay(&self, delay: Duration) {
        self.state().negotiate_delay = delay;
    }

    pub fn set_failure(&self, failure: Option<MockFailure>) {
        self.state().failure = failure;
    }

    /// Number of `enumerate` calls so far.
    pub fn enumerations(&self) -> usize {
        self.shared.enumerations.load(Ordering::SeqCst)
    }

    /// Handles handed out by `open`.
    pub fn acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    /// Handles given back through `release`.
    pub fn released(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// `stop` calls received.
    pub fn stopped(&self) -> usize {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Feed one step to the running capture of `kind`.
    ///
    /// Returns `false` if no capture for that stream is running.
    pub fn push(&self, kind: StreamKind, step: CaptureStep) -> bool {
        match self.state().feeds.get(&kind) {
            Some(feed) => feed.send(step).is_ok(),
            None => false,
        }
    }

    pub fn push_frame(&self, kind: StreamKind, sequence: u32) -> bool {
        self.push(kind, CaptureStep::Frame(small_frame(kind, sequence)))
    }
}

fn small_format(kind: StreamKind) -> PixelFormat {
    match kind {
        StreamKind::Color => PixelFormat::Bgrx,
        StreamKind::Depth => PixelFormat::Float32,
    }
}

/// The 2x2 stream request that [`small_frame`] satisfies.
pub fn small_request(kind: StreamKind) -> StreamRequest {
    StreamRequest { width: 2, height: 2, pixel_format: small_format(kind), fps: 30 }
}

/// The profile a channel negotiated from [`small_request`] is opened with.
pub fn small_profile(kind: StreamKind) -> StreamProfile {
    StreamProfile::from_request(kind, &small_request(kind))
}

/// Session configuration negotiating 2x2 streams on the mock backend.
pub fn small_config() -> SessionConfig {
    SessionConfig {
        color: small_request(StreamKind::Color),
        depth: small_request(StreamKind::Depth),
        ..SessionConfig::default()
    }
}

/// A 2x2 frame for `kind` that matches [`small_profile`].
pub fn small_frame(kind: StreamKind, sequence: u32) -> Frame {
    let format = small_format(kind);
    Frame::new(
        kind,
        2,
        2,
        format,
        Duration::from_millis(sequence as u64 * 33),
        sequence,
        vec![sequence as u8; 2 * 2 * format.bytes_per_pixel()],
    )
}

#[async_trait::async_trait]
impl DeviceBackend for MockBackend {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        self.shared.enumerations.fetch_add(1, Ordering::SeqCst);
        let (available, delay, serials) = {
            let state = self.state();
            (state.enumeration_available, state.enumeration_delay, state.serials.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !available {
            return Err(DeviceError::discovery("mock enumeration disabled"));
        }
        Ok(serials.into_iter().map(Device::kinect_v2).collect())
    }

    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceHandle>> {
        let (delay, failure) = {
            let state = self.state();
            (state.open_delay, state.failure)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(MockFailure::Busy) => {
                return Err(DeviceError::DeviceBusy { serial: device.serial_number.clone() });
            }
            Some(MockFailure::Unreachable) => {
                return Err(DeviceError::device_unreachable(
                    device.serial_number.clone(),
                    "mock transfer failed",
                ));
            }
            Some(MockFailure::Hang) => std::future::pending::<()>().await,
            _ => {}
        }

        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle { backend: self.clone(), failure, released: false }))
    }
}

struct MockHandle {
    backend: MockBackend,
    failure: Option<MockFailure>,
    released: bool,
}

#[async_trait::async_trait]
impl DeviceHandle for MockHandle {
    async fn negotiate(
        &mut self,
        requests: &[(StreamKind, StreamRequest)],
    ) -> Result<Vec<StreamProfile>> {
        let delay = self.backend.state().negotiate_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failure == Some(MockFailure::RejectNegotiation) {
            return Err(DeviceError::Negotiation {
                kind: StreamKind::Depth,
                reason: "mock refuses depth".to_string(),
            });
        }
        Ok(requests.iter().map(|(kind, request)| StreamProfile::from_request(*kind, request)).collect())
    }

    async fn start_capture(&mut self, profile: &StreamProfile) -> Result<Box<dyn FrameCapture>> {
        if self.failure == Some(MockFailure::FailStart(profile.kind)) {
            return Err(DeviceError::device_unreachable("mock", "stream start failed"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.backend.state().feeds.insert(profile.kind, tx);
        Ok(Box::new(MockCapture { kind: profile.kind, steps: rx }))
    }

    async fn stop(&mut self) -> Result<()> {
        self.backend.shared.stopped.fetch_add(1, Ordering::SeqCst);
        self.backend.state().feeds.clear();
        Ok(())
    }

    fn release(&mut self) {
        assert!(!self.released, "handle released twice");
        self.released = true;
        self.backend.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockCapture {
    kind: StreamKind,
    steps: mpsc::UnboundedReceiver<CaptureStep>,
}

#[async_trait::async_trait]
impl FrameCapture for MockCapture {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.steps.recv().await {
            Some(CaptureStep::Frame(frame)) => Ok(Some(frame)),
            Some(CaptureStep::Error(reason)) => Err(DeviceError::capture_failed(self.kind, reason)),
            Some(CaptureStep::End) => Ok(None),
            // Feed dropped by `stop`; park until cancelled
            None => std::future::pending().await,
        }
    }
}
