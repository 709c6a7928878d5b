/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The configured header width is outside `1..=8` bytes.
    #[error("invalid header length {0} (must be 1..=8 bytes)")]
    InvalidHeaderLength(usize),

    /// The body limit cannot be expressed in the configured header width.
    #[error("max body length {max} does not fit a {header_length}-byte header")]
    BodyLimitTooWide { max: usize, header_length: usize },

    /// An outbound body exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An inbound header declared a body longer than the configured maximum.
    ///
    /// The stream can no longer be trusted to be frame-aligned.
    #[error("protocol violation: declared body length {declared} exceeds max {max}")]
    ProtocolViolation { declared: u64, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed by the remote end.
    #[error("connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
