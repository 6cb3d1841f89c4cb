//! Latest-frame channel between one capture task and any number of consumers
//!
//! A [`FrameChannel`] holds at most one frame. Publishing swaps the held
//! frame under the channel lock and never waits on consumers; a frame that is
//! replaced before anyone took it is counted in [`ChannelStats::dropped`].
//!
//! The channel is opened when its session becomes `Connected` and closed when
//! the session leaves `Connected`. A closed channel refuses frames, returns
//! `None` from [`latest`](FrameChannel::latest) and ends every subscription
//! that was taken while it was open.

use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::types::{Frame, StreamKind, StreamProfile};

/// Counters for one channel, reset every time the channel opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames accepted by `publish`
    pub published: u64,
    /// Frames replaced before any consumer took them
    pub dropped: u64,
    /// Frames refused because they did not match the negotiated profile
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Slot {
    open: bool,
    /// Bumped on every open and close so subscriptions know their session ended
    epoch: u64,
    /// Channel-local publish counter, identifies the held frame
    serial: u64,
    /// What the stream negotiated; set while open
    profile: Option<StreamProfile>,
    frame: Option<Arc<Frame>>,
    taken: bool,
}

#[derive(Debug)]
struct Shared {
    kind: StreamKind,
    slot: watch::Sender<Slot>,
    published: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
}

/// Single-slot, lossy frame channel for one stream kind.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct FrameChannel {
    shared: Arc<Shared>,
}

enum Publish {
    Accepted,
    Rejected(StreamProfile),
    Closed,
}

enum Next {
    Yield(Arc<Frame>, u64),
    Wait,
    End,
}

impl FrameChannel {
    /// Create a closed channel.
    pub fn new(kind: StreamKind) -> Self {
        let (slot, _) = watch::channel(Slot::default());
        Self {
            shared: Arc::new(Shared {
                kind,
                slot,
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.shared.kind
    }

    pub fn is_open(&self) -> bool {
        self.shared.slot.borrow().open
    }

    /// Start accepting frames shaped like `profile`. Clears any held frame
    /// and resets the counters.
    pub fn open(&self, profile: StreamProfile) {
        let shared = &self.shared;
        shared.slot.send_modify(|slot| {
            slot.open = true;
            slot.epoch += 1;
            slot.profile = Some(profile);
            slot.frame = None;
            slot.taken = false;
            shared.published.store(0, Ordering::Relaxed);
            shared.dropped.store(0, Ordering::Relaxed);
            shared.rejected.store(0, Ordering::Relaxed);
        });
        debug!(
            stream = %shared.kind,
            width = profile.width,
            height = profile.height,
            pixel_format = ?profile.pixel_format,
            "Frame channel opened"
        );
    }

    /// Stop accepting frames, discard the held frame and end subscriptions.
    pub fn close(&self) {
        let mut was_open = false;
        self.shared.slot.send_if_modified(|slot| {
            was_open = slot.open;
            if !slot.open && slot.frame.is_none() {
                return false;
            }
            slot.open = false;
            slot.epoch += 1;
            slot.profile = None;
            slot.frame = None;
            slot.taken = false;
            true
        });
        if was_open {
            debug!(stream = %self.shared.kind, "Frame channel closed");
        }
    }

    /// Replace the held frame.
    ///
    /// Returns `false` if the frame was refused: the channel is closed, or
    /// the frame does not match the negotiated profile (wrong stream,
    /// geometry, pixel format or payload size). Mismatches count as rejected.
    pub fn publish(&self, frame: Frame) -> bool {
        let shared = &self.shared;
        let frame = Arc::new(frame);
        let mut outcome = Publish::Closed;

        shared.slot.send_if_modified(|slot| {
            let Some(profile) = slot.profile.filter(|_| slot.open) else {
                return false;
            };
            if !frame.matches(&profile) {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                outcome = Publish::Rejected(profile);
                return false;
            }
            if slot.frame.is_some() && !slot.taken {
                shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            slot.frame = Some(Arc::clone(&frame));
            slot.taken = false;
            slot.serial += 1;
            shared.published.fetch_add(1, Ordering::Relaxed);
            outcome = Publish::Accepted;
            true
        });

        match outcome {
            Publish::Accepted => {
                trace!(stream = %shared.kind, sequence = frame.sequence, "Frame published");
                true
            }
            Publish::Rejected(profile) => {
                warn!(
                    stream = %shared.kind,
                    frame_kind = %frame.kind,
                    width = frame.width,
                    height = frame.height,
                    pixel_format = ?frame.pixel_format,
                    payload_len = frame.payload.len(),
                    expected = ?profile,
                    "Rejected frame not matching the negotiated profile"
                );
                false
            }
            Publish::Closed => false,
        }
    }

    /// The most recently published frame, without consuming it.
    ///
    /// Repeated calls return the same frame until a new one is published.
    /// Returns `None` while the channel is closed or before the first publish.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let mut latest = None;
        self.shared.slot.send_if_modified(|slot| {
            if slot.open {
                if let Some(frame) = &slot.frame {
                    slot.taken = true;
                    latest = Some(Arc::clone(frame));
                }
            }
            false
        });
        latest
    }

    /// Wait for each newly published frame.
    ///
    /// The stream does not yield the frame held at subscription time; it
    /// suspends until the next publish. When the producer outpaces the
    /// consumer, intermediate frames are skipped (latest wins). The stream
    /// ends when the channel closes; a subscription taken on a closed channel
    /// ends immediately.
    pub fn subscribe(&self) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        let rx = self.shared.slot.subscribe();
        let epoch = {
            let slot = rx.borrow();
            slot.open.then_some(slot.epoch)
        };
        let shared = Arc::clone(&self.shared);

        futures::stream::unfold(
            (rx, shared, epoch, None::<u64>),
            |(mut rx, shared, epoch, last)| async move {
                let epoch = epoch?;
                loop {
                    if rx.changed().await.is_err() {
                        return None;
                    }

                    let mut next = Next::Wait;
                    shared.slot.send_if_modified(|slot| {
                        if !slot.open || slot.epoch != epoch {
                            next = Next::End;
                        } else if let Some(frame) = &slot.frame {
                            if last != Some(slot.serial) {
                                slot.taken = true;
                                next = Next::Yield(Arc::clone(frame), slot.serial);
                            }
                        }
                        false
                    });

                    match next {
                        Next::Yield(frame, serial) => {
                            return Some((frame, (rx, shared, Some(epoch), Some(serial))));
                        }
                        Next::Wait => continue,
                        Next::End => {
                            trace!(stream = %shared.kind, "Subscription ended");
                            return None;
                        }
                    }
                }
            },
        )
    }

    /// Snapshot of the counters since the channel last opened.
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.shared.published.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
        }
    }
}
