use std::fmt;

/// Lifecycle state of a [`crate::ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected (or the last explicit connect failed).
    Idle,
    /// An explicit `connect()` is in flight.
    Connecting,
    /// A link is up.
    Connected,
    /// The link was lost; a reconnect worker is backing off or retrying.
    Reconnecting,
    /// Stopped by request, by failure with reconnect disabled, or by exhausted retries.
    Disconnected,
}

impl ConnectionState {
    /// Whether a link is up or being re-established.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
