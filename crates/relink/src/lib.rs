//! Persistent framed TCP connections with heartbeats and automatic reconnect.
//!
//! relink keeps a long-lived client socket to a remote host alive: it frames
//! traffic with a big-endian length header, detects dead links with
//! heartbeats, and reconnects with backoff, failing over to a backup endpoint.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoints, remote addresses and the timed TCP connect
//! - [`frame`]: length-prefixed framing over any `Read`/`Write`
//! - [`conn`]: connection managers, registry and client (behind `conn` feature)

/// Re-export transport types.
pub mod transport {
    pub use relink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use relink_frame::*;
}

/// Re-export connection types (requires `conn` feature).
#[cfg(feature = "conn")]
pub mod conn {
    pub use relink_conn::*;
}
