use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use relink_transport::LinkStream;

use crate::codec::{Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Bytes left over after a decoded frame stay in a residual buffer for the
/// next call, so frames split across reads are reassembled byte-exactly.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with the default codec.
    pub fn new(inner: T) -> Self {
        Self::with_codec(inner, FrameCodec::default())
    }

    /// Create a new frame reader with an explicit codec.
    pub fn with_codec(inner: T, codec: FrameCodec) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec,
        }
    }

    /// Create a new frame reader from configuration.
    pub fn with_config(inner: T, config: &FrameConfig) -> Result<Self> {
        Ok(Self::with_codec(inner, config.codec()?))
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Number of received bytes not yet consumed by a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The codec used for decoding.
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

impl FrameReader<LinkStream> {
    /// Create a frame reader for a [`LinkStream`] and apply the read timeout from config.
    pub fn with_config_link(inner: LinkStream, config: &FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}

pub(crate) fn transport_to_frame_error(err: relink_transport::TransportError) -> FrameError {
    match err {
        relink_transport::TransportError::Io(io) => FrameError::Io(io),
        relink_transport::TransportError::Connect { source, .. }
        | relink_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
