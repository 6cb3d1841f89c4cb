//! Driver spawns and manages capture tasks

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::backend::FrameCapture;
use crate::channel::FrameChannel;
use crate::config::SessionConfig;
use crate::types::StreamKind;
use crate::DeviceError;

/// Called once when a capture task gives up on its stream.
pub(crate) type FailureHook = Arc<dyn Fn(DeviceError) + Send + Sync>;

/// Driver spawns one capture task per stream.
///
/// Each task owns its [`FrameCapture`] and publishes into the stream's
/// [`FrameChannel`]. Tasks stop when the token is cancelled or the channel
/// closes; a lost stream or too many consecutive errors are reported through
/// the failure hook.
pub(crate) struct Driver;

impl Driver {
    /// Spawn a capture task for one stream.
    pub fn spawn(
        kind: StreamKind,
        capture: Box<dyn FrameCapture>,
        channel: FrameChannel,
        config: Arc<SessionConfig>,
        cancel: CancellationToken,
        on_failure: FailureHook,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::capture_task(kind, capture, channel, config, cancel, on_failure).await;
        })
    }

    async fn capture_task(
        kind: StreamKind,
        mut capture: Box<dyn FrameCapture>,
        channel: FrameChannel,
        config: Arc<SessionConfig>,
        cancel: CancellationToken,
        on_failure: FailureHook,
    ) {
        info!(stream = %kind, "Capture task started");
        let mut frame_count = 0u64;
        let mut error_count = 0u32;
        let max_errors = config.max_consecutive_capture_errors;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(stream = %kind, "Capture cancelled");
                    break;
                }
                result = capture.next_frame() => result,
            };

            match result {
                Ok(Some(frame)) => {
                    error_count = 0;
                    frame_count += 1;
                    trace!(
                        stream = %kind,
                        sequence = frame.sequence,
                        timestamp = ?frame.timestamp,
                        "Frame {}",
                        frame_count
                    );

                    if !channel.publish(frame) && !channel.is_open() {
                        debug!(stream = %kind, "Frame channel closed, stopping capture");
                        break;
                    }
                }
                Ok(None) => {
                    warn!(stream = %kind, "Capture stream ended after {} frames", frame_count);
                    on_failure(DeviceError::capture_failed(kind, "stream ended, device lost"));
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    warn!(stream = %kind, "Capture error ({}/{}): {}", error_count, max_errors, e);

                    if error_count >= max_errors {
                        error!(stream = %kind, "Too many capture errors, giving up");
                        on_failure(DeviceError::capture_failed(
                            kind,
                            format!("{} consecutive errors, last: {}", error_count, e),
                        ));
                        break;
                    }

                    let backoff = config.capture_backoff(error_count);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!(stream = %kind, "Capture task ended ({} frames)", frame_count);
    }
}
