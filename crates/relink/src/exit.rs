use std::fmt;
use std::io;

use relink_conn::{ConnError, LinkFailure};
use relink_frame::FrameError;
use relink_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => TRANSPORT_ERROR,
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::ConnectTimeout { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::ProtocolViolation { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::InvalidHeaderLength(_) | FrameError::BodyLimitTooWide { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn link_failure(context: &str, failure: &LinkFailure) -> CliError {
    let code = match failure {
        LinkFailure::ProtocolViolation(_) => DATA_INVALID,
        LinkFailure::HeartbeatTimeout { .. } => TIMEOUT,
        LinkFailure::Io(_) | LinkFailure::WriteFailure(_) => TRANSPORT_ERROR,
        LinkFailure::ReconnectExhausted { .. } => TRANSPORT_ERROR,
        LinkFailure::RemoteClosed | LinkFailure::Requested => FAILURE,
    };
    CliError::new(code, format!("{context}: {failure}"))
}

pub fn conn_error(context: &str, err: ConnError) -> CliError {
    match err {
        ConnError::Transport(err) => transport_error(context, err),
        ConnError::Frame(err) => frame_error(context, err),
        ConnError::Link(failure) => link_failure(context, &failure),
        ConnError::ConnectTimeout { .. } | ConnError::RequestTimeout(_) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        ConnError::InvalidOptions(_) | ConnError::MissingAddress => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ConnError::NoActiveConnection | ConnError::Cancelled => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}
