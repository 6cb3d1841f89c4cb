//! Device session: connection lifecycle and stream activation
//!
//! A [`DeviceSession`] owns one device's connection and its two
//! [`FrameChannel`]s. All methods take `&self`, so a session can be shared
//! (for example behind an `Arc`) between a UI task that observes it and tasks
//! that connect or disconnect it.
//!
//! ```rust,no_run
//! use depthcam::{DepthCam, StreamKind};
//! use futures::StreamExt;
//!
//! # #[tokio::main]
//! # async fn main() -> depthcam::Result<()> {
//! let registry = DepthCam::simulated();
//! let device = registry.enumerate().await?.remove(0);
//! let session = registry.session(device);
//!
//! session.connect().await?;
//! let mut depth = Box::pin(session.subscribe(StreamKind::Depth));
//! if let Some(frame) = depth.next().await {
//!     println!("depth {}x{} #{}", frame.width, frame.height, frame.sequence);
//! }
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{DeviceBackend, DeviceHandle, FrameCapture};
use crate::channel::{ChannelStats, FrameChannel};
use crate::config::SessionConfig;
use crate::driver::{Driver, FailureHook};
use crate::registry::{ClaimTable, DeviceClaim};
use crate::stream::ThrottleExt;
use crate::types::{ConnectionState, Device, Frame, StreamKind, StreamProfile, UpdateRate};
use crate::{DeviceError, Result};


/// Reported by [`DeviceSession::serial_number`] until a connection is held.
pub const UNCONNECTED_SERIAL: &str = "0000000000";

/// Lifetime-bounded ownership of one device's connection and streams.
///
/// Dropping the session stops capture and releases the device.
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    device: Device,
    backend: Arc<dyn DeviceBackend>,
    claims: ClaimTable,
    config: Arc<SessionConfig>,
    state: watch::Sender<ConnectionState>,
    color: FrameChannel,
    depth: FrameChannel,
    /// Resources of the current connection, present in `Connected` and `Failed`
    active: Mutex<Option<ActiveStreams>>,
    /// Cancels the in-flight connect, present only in `Connecting`
    attempt: Mutex<Option<CancellationToken>>,
    /// Distinguishes connections so stale capture tasks cannot fail a newer one
    generation: AtomicU64,
}

/// Everything a connect produced before capture started.
struct Established {
    claim: DeviceClaim,
    handle: HandleGuard,
    profiles: Vec<StreamProfile>,
    captures: Vec<(StreamKind, Box<dyn FrameCapture>)>,
}

/// Everything a running connection owns. Dropping it stops capture and
/// releases the handle and the claim.
struct ActiveStreams {
    generation: u64,
    profiles: Vec<StreamProfile>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    handle: HandleGuard,
    _claim: DeviceClaim,
}

impl Drop for ActiveStreams {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Releases a device handle exactly once, whichever way it goes out of scope.
struct HandleGuard {
    handle: Box<dyn DeviceHandle>,
    serial: String,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        self.handle.release();
        debug!(serial = %self.serial, "Device handle released");
    }
}

/// Puts the session into a known state if the owning future is dropped.
struct StateReset<'a> {
    inner: &'a SessionInner,
    target: ConnectionState,
    armed: bool,
}

impl StateReset<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StateReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(&self.inner.attempt).take();
            self.inner.close_channels();
            self.inner.state.send_replace(self.target);
            debug!(state = %self.target, "Session state reset after interrupted operation");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeviceSession {
    pub(crate) fn new(
        device: Device,
        backend: Arc<dyn DeviceBackend>,
        claims: ClaimTable,
        config: Arc<SessionConfig>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                device,
                backend,
                claims,
                config,
                state,
                color: FrameChannel::new(StreamKind::Color),
                depth: FrameChannel::new(StreamKind::Depth),
                active: Mutex::new(None),
                attempt: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Connect to the device and start both streams.
    ///
    /// Only valid from `Disconnected`. While another connect is in flight this
    /// fails with `AlreadyInProgress`; from any other state with
    /// `InvalidState`. The whole open, negotiate and start sequence is bounded
    /// by the configured connect timeout.
    ///
    /// On failure the session returns to `Disconnected`, except for a
    /// negotiation failure, which leaves it `Failed`. The device handle is
    /// released on every failure path, and also if this future is dropped
    /// before it completes.
    pub async fn connect(&self) -> Result<()> {
        let inner = &*self.inner;
        let serial = inner.device.serial_number.clone();
        let cancel = CancellationToken::new();

        let mut observed = ConnectionState::Disconnected;
        let started = inner.state.send_if_modified(|state| {
            observed = *state;
            if !state.can_connect() {
                return false;
            }
            *lock(&inner.attempt) = Some(cancel.clone());
            *state = ConnectionState::Connecting;
            true
        });
        if !started {
            debug!(serial = %serial, state = %observed, "Connect refused");
            return Err(match observed {
                ConnectionState::Connecting => DeviceError::AlreadyInProgress { serial },
                state => DeviceError::InvalidState { operation: "connect", state },
            });
        }

        info!(serial = %serial, "Connecting");
        let reset =
            StateReset { inner, target: ConnectionState::Disconnected, armed: true };

        let timeout = inner.config.connect_timeout();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(DeviceError::Cancelled { operation: "connect" }),
            result = tokio::time::timeout(timeout, inner.establish()) => match result {
                Ok(result) => result,
                Err(_) => Err(DeviceError::Timeout { operation: "connect", duration: timeout }),
            },
        };
        lock(&inner.attempt).take();

        match outcome {
            Ok(established) => {
                reset.disarm();
                inner.activate(&self.inner, established);
                info!(serial = %serial, "Connected");
                Ok(())
            }
            Err(e) => {
                reset.disarm();
                let next = match e {
                    DeviceError::Negotiation { .. } => ConnectionState::Failed,
                    _ => ConnectionState::Disconnected,
                };
                inner.state.send_replace(next);
                warn!(serial = %serial, state = %next, "Connect failed: {}", e);
                Err(e)
            }
        }
    }

    /// Stop capture, release the device and return to `Disconnected`.
    ///
    /// Valid from every state and idempotent: on a disconnected session this
    /// does nothing. Concurrent callers all return once the session is
    /// `Disconnected`.
    ///
    /// An in-flight connect is cancelled, and this call then waits for that
    /// connect to unwind. The connect future must therefore still be polled
    /// (spawned, or joined with this call), or be dropped. Awaiting
    /// `disconnect` in the same task before an unpolled connect future never
    /// returns.
    pub async fn disconnect(&self) {
        let inner = &*self.inner;
        let mut state_rx = inner.state.subscribe();

        loop {
            let current = *state_rx.borrow_and_update();
            match current {
                ConnectionState::Disconnected => {
                    debug!(serial = %inner.device.serial_number, "Already disconnected");
                    return;
                }
                ConnectionState::Connecting => {
                    if let Some(attempt) = lock(&inner.attempt).as_ref() {
                        attempt.cancel();
                    }
                    let _ = state_rx.wait_for(|s| *s != ConnectionState::Connecting).await;
                }
                ConnectionState::Disconnecting => {
                    let _ = state_rx.wait_for(|s| *s == ConnectionState::Disconnected).await;
                    return;
                }
                ConnectionState::Connected | ConnectionState::Failed => {
                    // No frame may be visible once the state leaves Connected
                    inner.close_channels();
                    let moved = inner.state.send_if_modified(|state| {
                        if *state != current {
                            return false;
                        }
                        *state = ConnectionState::Disconnecting;
                        true
                    });
                    if moved {
                        inner.teardown().await;
                        return;
                    }
                }
            }
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// State changes, starting with the current state.
    ///
    /// Intermediate states may be coalesced if the consumer falls behind; the
    /// last state is always delivered.
    pub fn state_updates(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        WatchStream::new(self.inner.state.subscribe())
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_streaming()
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Serial of the connected device, or [`UNCONNECTED_SERIAL`] while no
    /// connection is held. [`device`](Self::device) is always available.
    pub fn serial_number(&self) -> &str {
        if lock(&self.inner.active).is_some() {
            &self.inner.device.serial_number
        } else {
            UNCONNECTED_SERIAL
        }
    }

    /// Channel carrying one stream.
    pub fn channel(&self, kind: StreamKind) -> &FrameChannel {
        self.inner.channel(kind)
    }

    /// Most recent frame of a stream; `None` unless connected.
    pub fn latest(&self, kind: StreamKind) -> Option<Arc<Frame>> {
        self.inner.channel(kind).latest()
    }

    /// Every new frame of a stream until the session leaves `Connected`.
    pub fn subscribe(&self, kind: StreamKind) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        self.inner.channel(kind).subscribe()
    }

    /// Like [`subscribe`](Self::subscribe), woken at most at `rate`.
    pub fn subscribe_with_rate(
        &self,
        kind: StreamKind,
        rate: UpdateRate,
    ) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        let fps = self
            .negotiated(kind)
            .map(|profile| profile.fps)
            .unwrap_or_else(|| self.inner.config.request(kind).fps);
        let frames = self.inner.channel(kind).subscribe();

        match rate.throttle_interval(fps) {
            None => frames.boxed(),
            Some(interval) => frames.throttle(interval).boxed(),
        }
    }

    /// Counters of one stream since the current connection started.
    pub fn stats(&self, kind: StreamKind) -> ChannelStats {
        self.inner.channel(kind).stats()
    }

    /// Parameters the device agreed to for a stream, while a connection exists.
    pub fn negotiated(&self, kind: StreamKind) -> Option<StreamProfile> {
        lock(&self.inner.active)
            .as_ref()
            .and_then(|active| active.profiles.iter().find(|p| p.kind == kind).copied())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let inner = &*self.inner;
        if let Some(attempt) = lock(&inner.attempt).take() {
            attempt.cancel();
        }
        inner.close_channels();
        if lock(&inner.active).take().is_some() {
            debug!(serial = %inner.device.serial_number, "Dropping connected session");
        }
        inner.state.send_replace(ConnectionState::Disconnected);
    }
}

impl SessionInner {
    fn channel(&self, kind: StreamKind) -> &FrameChannel {
        match kind {
            StreamKind::Color => &self.color,
            StreamKind::Depth => &self.depth,
        }
    }

    fn close_channels(&self) {
        self.color.close();
        self.depth.close();
    }

    /// Claim, open, negotiate and start both streams.
    async fn establish(&self) -> Result<Established> {
        let serial = &self.device.serial_number;
        let claim = self.claims.claim(&self.device)?;

        debug!(serial = %serial, "Opening device");
        let mut handle = HandleGuard {
            handle: self.backend.open(&self.device).await?,
            serial: serial.clone(),
        };

        let requests: Vec<_> =
            StreamKind::ALL.iter().map(|kind| (*kind, *self.config.request(*kind))).collect();
        let profiles = handle.handle.negotiate(&requests).await?;
        for kind in StreamKind::ALL {
            if !profiles.iter().any(|p| p.kind == kind) {
                return Err(DeviceError::Negotiation {
                    kind,
                    reason: "device did not return a profile".to_string(),
                });
            }
        }
        debug!(serial = %serial, ?profiles, "Streams negotiated");

        let mut captures = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            match handle.handle.start_capture(profile).await {
                Ok(capture) => captures.push((profile.kind, capture)),
                Err(e) => {
                    if let Err(stop_err) = handle.handle.stop().await {
                        warn!(serial = %serial, "Stopping streams after failed start: {}", stop_err);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Established { claim, handle, profiles, captures })
    }

    /// Move to `Connected`, open the channels and spawn capture.
    ///
    /// Runs entirely under the `active` lock, so a concurrent teardown that
    /// observes `Connected` always finds the connection's resources.
    fn activate(&self, this: &Arc<SessionInner>, established: Established) {
        let Established { claim, handle, profiles, captures } = established;
        let mut active = lock(&self.active);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        // State first, then channels: frames never appear before Connected
        self.state.send_replace(ConnectionState::Connected);
        for profile in &profiles {
            self.channel(profile.kind).open(*profile);
        }

        let cancel = CancellationToken::new();
        let tasks = captures
            .into_iter()
            .map(|(kind, capture)| {
                let weak = Arc::downgrade(this);
                let on_failure: FailureHook =
                    Arc::new(move |err: DeviceError| SessionInner::on_capture_failure(&weak, generation, err));
                Driver::spawn(
                    kind,
                    capture,
                    self.channel(kind).clone(),
                    Arc::clone(&self.config),
                    cancel.clone(),
                    on_failure,
                )
            })
            .collect();

        *active = Some(ActiveStreams { generation, profiles, cancel, tasks, handle, _claim: claim });
    }

    /// Capture lost: `Connected` becomes `Failed`. The handle stays owned until
    /// the caller disconnects.
    fn on_capture_failure(this: &Weak<SessionInner>, generation: u64, err: DeviceError) {
        let Some(inner) = this.upgrade() else {
            return;
        };
        let active = lock(&inner.active);
        let Some(active) = active.as_ref().filter(|a| a.generation == generation) else {
            debug!("Ignoring failure from a previous connection: {}", err);
            return;
        };

        inner.close_channels();
        let failed = inner.state.send_if_modified(|state| {
            if *state != ConnectionState::Connected {
                return false;
            }
            *state = ConnectionState::Failed;
            true
        });
        active.cancel.cancel();

        if failed {
            error!(serial = %inner.device.serial_number, "Session failed: {}", err);
        }
    }

    /// Stop capture, stop streams, release everything, then `Disconnected`.
    async fn teardown(&self) {
        let reset = StateReset { inner: self, target: ConnectionState::Disconnected, armed: true };
        let serial = &self.device.serial_number;
        let active = lock(&self.active).take();
        // Activation may have opened the channels after the caller closed them
        self.close_channels();

        if let Some(mut active) = active {
            let timeout = self.config.disconnect_timeout();
            active.cancel.cancel();

            let joined = futures::future::join_all(active.tasks.iter_mut());
            if tokio::time::timeout(timeout, joined).await.is_err() {
                warn!(serial = %serial, "Capture tasks did not stop within {:?}, aborting", timeout);
            }

            match tokio::time::timeout(timeout, active.handle.handle.stop()).await {
                Ok(Ok(())) => debug!(serial = %serial, "Streams stopped"),
                Ok(Err(e)) => warn!(serial = %serial, "Stopping streams failed: {}", e),
                Err(_) => warn!(serial = %serial, "Stopping streams timed out after {:?}", timeout),
            }
            // Handle and claim are released here
            drop(active);
        }

        reset.disarm();
        self.state.send_replace(ConnectionState::Disconnected);
        info!(serial = %serial, "Disconnected");
    }
}
