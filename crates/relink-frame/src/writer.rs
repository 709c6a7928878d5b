use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use relink_transport::LinkStream;

use crate::codec::{Frame, FrameCodec, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with the default codec.
    pub fn new(inner: T) -> Self {
        Self::with_codec(inner, FrameCodec::default())
    }

    /// Create a new frame writer with an explicit codec.
    pub fn with_codec(inner: T, codec: FrameCodec) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            codec,
        }
    }

    /// Create a new frame writer from configuration.
    pub fn with_config(inner: T, config: &FrameConfig) -> Result<Self> {
        Ok(Self::with_codec(inner, config.codec()?))
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.body.as_ref())
    }

    /// Encode `body` and write `header ++ body` in full, then flush.
    ///
    /// Nothing is written if the body exceeds the codec's limit.
    pub fn send(&mut self, body: &[u8]) -> Result<()> {
        self.buf.clear();
        self.codec.encode(body, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The codec used for encoding.
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }
}

impl FrameWriter<LinkStream> {
    /// Create a frame writer for a [`LinkStream`] and apply the write timeout from config.
    pub fn with_config_link(inner: LinkStream, config: &FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Self::with_config(inner, config)
    }
}
