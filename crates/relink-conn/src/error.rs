use std::time::Duration;

use relink_frame::FrameError;
use relink_transport::{Endpoint, TransportError};

/// Errors returned by connection operations.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// No remote address was configured before connecting.
    #[error("no remote address configured")]
    MissingAddress,

    /// A send or lookup was made with no live connection behind it.
    #[error("no active connection")]
    NoActiveConnection,

    /// Options failed validation when the manager was built.
    #[error("invalid connection options: {0}")]
    InvalidOptions(String),

    /// A connect attempt exceeded `connect_timeout`.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: Endpoint, timeout: Duration },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The link died while the operation was outstanding.
    #[error("link lost: {0}")]
    Link(LinkFailure),

    /// The operation was abandoned because the connection was torn down.
    #[error("cancelled")]
    Cancelled,

    /// No correlated response arrived within `request_timeout`.
    #[error("no response within {0:?}")]
    RequestTimeout(Duration),
}

impl From<TransportError> for ConnError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ConnectTimeout { endpoint, timeout } => {
                ConnError::ConnectTimeout { endpoint, timeout }
            }
            other => ConnError::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnError>;

/// Why a live link stopped, as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkFailure {
    /// The remote end closed the stream.
    #[error("remote closed the connection")]
    RemoteClosed,

    /// An inbound header violated the framing contract.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A receive failed.
    #[error("i/o error: {0}")]
    Io(String),

    /// A send failed partway.
    #[error("write failure: {0}")]
    WriteFailure(String),

    /// No inbound traffic for `missed` consecutive heartbeat intervals.
    #[error("heartbeat timeout after {missed} missed intervals")]
    HeartbeatTimeout { missed: u32 },

    /// The application asked for the disconnect.
    #[error("disconnect requested")]
    Requested,

    /// The backoff policy ran out of attempts.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },
}

impl LinkFailure {
    /// Classify a reader-side frame error.
    pub(crate) fn from_read_error(err: &FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => LinkFailure::RemoteClosed,
            FrameError::ProtocolViolation { .. } => LinkFailure::ProtocolViolation(err.to_string()),
            FrameError::Io(io) => LinkFailure::Io(io.to_string()),
            other => LinkFailure::Io(other.to_string()),
        }
    }

    /// Short machine-friendly name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LinkFailure::RemoteClosed => "remote_closed",
            LinkFailure::ProtocolViolation(_) => "protocol_violation",
            LinkFailure::Io(_) => "io_error",
            LinkFailure::WriteFailure(_) => "write_failure",
            LinkFailure::HeartbeatTimeout { .. } => "heartbeat_timeout",
            LinkFailure::Requested => "requested",
            LinkFailure::ReconnectExhausted { .. } => "reconnect_exhausted",
        }
    }
}
