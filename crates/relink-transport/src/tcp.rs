use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::address::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::LinkStream;

/// Connect to an endpoint, bounding the whole attempt by `timeout`.
///
/// The endpoint may resolve to several socket addresses; each is tried in
/// turn with whatever remains of the budget. If the budget runs out, or the
/// last failure was itself a timeout, the result is
/// [`TransportError::ConnectTimeout`].
///
/// Name resolution counts against the same budget. A lookup cannot be
/// interrupted, so a resolver that stalls past the deadline is only
/// reported as a timeout once it returns.
pub fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<LinkStream> {
    let deadline = Instant::now() + timeout;
    let addrs = resolve(endpoint)?;

    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(&addr, remaining) {
            Ok(stream) => {
                let stream = LinkStream::from(stream);
                stream.set_nodelay(true)?;
                debug!(%endpoint, %addr, "connected");
                return Ok(stream);
            }
            Err(err) => {
                debug!(%endpoint, %addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(connect_error(endpoint, timeout, last_err))
}

fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::NoAddresses(endpoint.clone()));
    }
    Ok(addrs)
}

fn connect_error(
    endpoint: &Endpoint,
    timeout: Duration,
    last_err: Option<std::io::Error>,
) -> TransportError {
    match last_err {
        Some(err) if !is_timeout_kind(err.kind()) => TransportError::Connect {
            endpoint: endpoint.clone(),
            source: err,
        },
        _ => TransportError::ConnectTimeout {
            endpoint: endpoint.clone(),
            timeout,
        },
    }
}

fn is_timeout_kind(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Async variant of [`connect`] returning a tokio stream.
#[cfg(feature = "async")]
pub async fn connect_async(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<tokio::net::TcpStream> {
    let target = (endpoint.host.as_str(), endpoint.port);
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            debug!(%endpoint, "connected");
            Ok(stream)
        }
        Ok(Err(err)) => Err(connect_error(endpoint, timeout, Some(err))),
        Err(_) => Err(TransportError::ConnectTimeout {
            endpoint: endpoint.clone(),
            timeout,
        }),
    }
}
