use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default header width: 4 bytes.
pub const DEFAULT_HEADER_LENGTH: usize = 4;

/// Widest supported header.
pub const MAX_HEADER_LENGTH: usize = 8;

/// Default maximum body size: 5 MiB.
pub const DEFAULT_MAX_BODY_LENGTH: usize = 5 * 1024 * 1024;

/// Upper bound on what `decode` pre-allocates for a partial body.
const MAX_DECODE_RESERVE: usize = 64 * 1024;

/// One length-prefixed unit of application data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message body (header already stripped).
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Length carried in the header.
    pub fn body_length(&self) -> usize {
        self.body.len()
    }

    /// The total wire size of this frame for a given header width.
    pub fn wire_size(&self, header_length: usize) -> usize {
        header_length + self.body.len()
    }
}

/// Stateless converter between bodies and `header ++ body` wire bytes.
///
/// Wire format:
/// ```text
/// ┌────────────────────────────┬────────────────────┐
/// │ Length (header_length B,   │ Body               │
/// │ unsigned big-endian)       │ (Length bytes)     │
/// └────────────────────────────┴────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_length: usize,
    max_body_length: usize,
}

impl FrameCodec {
    /// Build a codec, rejecting header widths outside `1..=8` and body limits
    /// the header cannot represent.
    pub fn new(header_length: usize, max_body_length: usize) -> Result<Self> {
        if header_length == 0 || header_length > MAX_HEADER_LENGTH {
            return Err(FrameError::InvalidHeaderLength(header_length));
        }
        if max_body_length as u64 > max_body_for_header(header_length) {
            return Err(FrameError::BodyLimitTooWide {
                max: max_body_length,
                header_length,
            });
        }
        Ok(Self {
            header_length,
            max_body_length,
        })
    }

    pub fn header_length(&self) -> usize {
        self.header_length
    }

    pub fn max_body_length(&self) -> usize {
        self.max_body_length
    }

    /// Append `header ++ body` to `dst`.
    pub fn encode(&self, body: &[u8], dst: &mut BytesMut) -> Result<()> {
        if body.len() > self.max_body_length {
            return Err(FrameError::PayloadTooLarge {
                size: body.len(),
                max: self.max_body_length,
            });
        }
        dst.reserve(self.header_length + body.len());
        dst.put_uint(body.len() as u64, self.header_length);
        dst.put_slice(body);
        Ok(())
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` while the header or body is incomplete; the caller
    /// keeps the unconsumed bytes and retries once more arrive. On success
    /// exactly one frame is consumed and any residue stays in `src`.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < self.header_length {
            return Ok(None);
        }

        let declared = (&src[..self.header_length]).get_uint(self.header_length);
        if declared > self.max_body_length as u64 {
            return Err(FrameError::ProtocolViolation {
                declared,
                max: self.max_body_length,
            });
        }

        let body_length = declared as usize;
        let Some(frame_length) = self.header_length.checked_add(body_length) else {
            return Err(FrameError::ProtocolViolation {
                declared,
                max: self.max_body_length,
            });
        };
        if src.len() < frame_length {
            src.reserve((frame_length - src.len()).min(MAX_DECODE_RESERVE));
            return Ok(None);
        }

        src.advance(self.header_length);
        let body = src.split_to(body_length).freeze();
        Ok(Some(Frame { body }))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            header_length: DEFAULT_HEADER_LENGTH,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
        }
    }
}

/// Largest body length a `header_length`-byte header can express.
pub fn max_body_for_header(header_length: usize) -> u64 {
    if header_length >= MAX_HEADER_LENGTH {
        u64::MAX
    } else {
        (1u64 << (header_length * 8)) - 1
    }
}

/// Encode a body with the default 4-byte header.
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<()> {
    FrameCodec::default().encode(body, dst)
}

/// Decode a frame with the default 4-byte header and an explicit body limit.
pub fn decode_frame(src: &mut BytesMut, max_body_length: usize) -> Result<Option<Frame>> {
    FrameCodec::new(DEFAULT_HEADER_LENGTH, max_body_length)?.decode(src)
}

/// Configuration for framed readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Header width in bytes. Default: 4.
    pub header_length: usize,
    /// Maximum body size in bytes. Default: 5 MiB.
    pub max_body_length: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl FrameConfig {
    /// Build the codec this configuration describes.
    pub fn codec(&self) -> Result<FrameCodec> {
        FrameCodec::new(self.header_length, self.max_body_length)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            header_length: DEFAULT_HEADER_LENGTH,
            max_body_length: DEFAULT_MAX_BODY_LENGTH,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        FrameCodec::decode(self, src)
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Bytes> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        FrameCodec::encode(self, &item, dst)
    }
}
