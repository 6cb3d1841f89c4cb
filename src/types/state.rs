//! Session connection state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`DeviceSession`](crate::DeviceSession).
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
///                      \             \
///                       +-> Failed <--+
/// ```
///
/// `Failed` is terminal for the session's current connection: the caller has
/// to `disconnect()` before connecting again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// Only a disconnected session accepts `connect()`.
    pub fn can_connect(self) -> bool {
        self == ConnectionState::Disconnected
    }

    /// Whether the session may be holding a device handle.
    pub fn is_active(self) -> bool {
        !matches!(self, ConnectionState::Disconnected)
    }

    /// Frames are only observable while connected.
    pub fn is_streaming(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}
