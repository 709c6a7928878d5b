use std::time::Duration;

use crate::address::Endpoint;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be parsed or resolved to a socket address.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no socket addresses.
    #[error("no socket addresses for {0}")]
    NoAddresses(Endpoint),

    /// Failed to connect to the specified endpoint.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        source: std::io::Error,
    },

    /// The connect attempt did not complete within the configured bound.
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: Endpoint, timeout: Duration },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether this error came from the connect bound expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::ConnectTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
