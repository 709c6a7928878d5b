//! TCP transport layer for relink.
//!
//! Provides the endpoint model used to identify remote peers and a timed
//! connect that yields a [`LinkStream`]. This is the lowest layer of relink;
//! framing and connection management build on top of it.

pub mod address;
pub mod error;
pub mod stream;
pub mod tcp;

pub use address::{Endpoint, RemoteAddress};
pub use error::{Result, TransportError};
pub use stream::LinkStream;
pub use tcp::connect;

#[cfg(feature = "async")]
pub use tcp::connect_async;
