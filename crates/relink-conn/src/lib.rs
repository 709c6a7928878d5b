//! Persistent TCP connections that stay up.
//!
//! A [`ConnectionManager`] owns one socket to a [`RemoteAddress`], frames
//! traffic with a length header, pings it with heartbeats, and reconnects
//! with backoff (alternating to a backup endpoint) when the link dies.
//! Managers live in a [`ConnectionRegistry`], one per address; [`Client`]
//! is the single-address front end.

mod callbacks;
pub mod client;
pub mod error;
mod heartbeat;
mod inbound;
mod link;
pub mod listener;
pub mod manager;
pub mod options;
mod outbound;
pub mod registry;
mod signal;
pub mod state;

pub use callbacks::{Delivery, PendingSend, SendCallback};
pub use client::Client;
pub use error::{ConnError, LinkFailure, Result};
pub use heartbeat::HeartbeatListener;
pub use listener::SocketActionListener;
pub use manager::ConnectionManager;
pub use options::{BackoffPolicy, ConnectionOptions, CorrelationExtractor};
pub use registry::ConnectionRegistry;
pub use relink_frame::Frame;
pub use relink_transport::{Endpoint, RemoteAddress};
pub use state::ConnectionState;
