#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use relink_conn::{ConnError, ConnectionManager, ConnectionState, Endpoint, Frame, LinkFailure};
use relink_conn::{RemoteAddress, SocketActionListener};
use relink_frame::{decode_frame, encode_frame, DEFAULT_MAX_BODY_LENGTH};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Attached(Endpoint),
    ConnectFailed { endpoint: Endpoint, will_retry: bool },
    Detached { cause: LinkFailure, will_reconnect: bool },
    Frame(Bytes),
}

/// Listener that records every callback in order.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until `pred` holds for the recorded events.
    pub fn wait_for(&self, what: &str, pred: impl Fn(&[Event]) -> bool) -> Vec<Event> {
        let deadline = Instant::now() + WAIT;
        let mut events = self.events.lock().unwrap();
        while !pred(&events) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "timed out waiting for {what}: {events:?}");
            events = self.changed.wait_timeout(events, remaining).unwrap().0;
        }
        events.clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl SocketActionListener for EventLog {
    fn on_attached(&self, _address: &RemoteAddress, endpoint: &Endpoint) {
        self.push(Event::Attached(endpoint.clone()));
    }

    fn on_connect_failed(
        &self,
        _address: &RemoteAddress,
        endpoint: &Endpoint,
        _error: &ConnError,
        will_retry: bool,
    ) {
        self.push(Event::ConnectFailed {
            endpoint: endpoint.clone(),
            will_retry,
        });
    }

    fn on_detached(&self, _address: &RemoteAddress, cause: &LinkFailure, will_reconnect: bool) {
        self.push(Event::Detached {
            cause: cause.clone(),
            will_reconnect,
        });
    }

    fn on_frame(&self, _address: &RemoteAddress, frame: &Frame) {
        self.push(Event::Frame(frame.body.clone()));
    }
}

pub fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("loopback bind should succeed");
    let port = listener.local_addr().expect("bound socket has an address").port();
    (listener, port)
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let (listener, port) = listener();
    drop(listener);
    port
}

/// A listener whose accept queue is full, so further SYNs go unanswered.
///
/// The returned streams hold the queued connections; dropping them does not
/// free the queue, only accepting does.
pub fn saturated_listener() -> (TcpListener, u16, Vec<TcpStream>) {
    let (listener, port) = listener();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let mut held = Vec::new();
    for _ in 0..4096 {
        match TcpStream::connect_timeout(&addr, Duration::from_millis(200)) {
            Ok(stream) => held.push(stream),
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                return (listener, port, held);
            }
            Err(err) => panic!("unexpected error filling the accept queue: {err}"),
        }
    }
    panic!("accept queue never filled");
}

pub fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().expect("accept should succeed");
    stream
}

pub fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    let mut wire = BytesMut::new();
    encode_frame(body, &mut wire).expect("body fits the default codec");
    stream.write_all(&wire).expect("server write should succeed");
}

/// Like [`write_frame`], but tolerates the client having gone away.
pub fn try_write_frame(stream: &mut TcpStream, body: &[u8]) -> bool {
    let mut wire = BytesMut::new();
    encode_frame(body, &mut wire).expect("body fits the default codec");
    stream.write_all(&wire).is_ok()
}

/// Blocking frame reader for the server side of a test.
pub struct ServerReader {
    buf: BytesMut,
}

impl ServerReader {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn next(&mut self, stream: &mut TcpStream) -> Option<Bytes> {
        loop {
            if let Some(frame) =
                decode_frame(&mut self.buf, DEFAULT_MAX_BODY_LENGTH).expect("client frames are valid")
            {
                return Some(frame.body);
            }
            let mut chunk = [0u8; 4096];
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

pub fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
    let deadline = Instant::now() + WAIT;
    while manager.state() != state {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {state}, still {}",
            manager.state()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
