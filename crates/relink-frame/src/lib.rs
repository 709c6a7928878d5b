//! Length-prefixed message framing for relink.
//!
//! Every message on the wire is a header holding the body length as an
//! unsigned big-endian integer (default 4 bytes, configurable 1..=8), followed
//! by exactly that many body bytes. No trailer, no checksum.
//!
//! [`FrameReader`] keeps a residual buffer across socket reads, so callers
//! always receive complete frames regardless of how the stream is chunked.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, max_body_for_header, Frame, FrameCodec, FrameConfig,
    DEFAULT_HEADER_LENGTH, DEFAULT_MAX_BODY_LENGTH, MAX_HEADER_LENGTH,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
