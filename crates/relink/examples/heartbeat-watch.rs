//! Keep a connection to the echo server alive with heartbeats and print
//! everything that happens to it.
//!
//! Run with:
//!   cargo run --example echo-server
//!   cargo run --example heartbeat-watch
//!
//! Stop and restart the echo server to watch the client reconnect.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relink::conn::{
    Client, ConnError, ConnectionOptions, Endpoint, Frame, LinkFailure, RemoteAddress,
    SocketActionListener,
};

struct Printer;

impl SocketActionListener for Printer {
    fn on_attached(&self, address: &RemoteAddress, endpoint: &Endpoint) {
        eprintln!("{address}: attached via {endpoint}");
    }

    fn on_connect_failed(
        &self,
        address: &RemoteAddress,
        endpoint: &Endpoint,
        error: &ConnError,
        will_retry: bool,
    ) {
        eprintln!("{address}: {endpoint} failed ({error}), retry={will_retry}");
    }

    fn on_detached(&self, address: &RemoteAddress, cause: &LinkFailure, will_reconnect: bool) {
        eprintln!("{address}: detached ({cause}), reconnect={will_reconnect}");
    }

    fn on_frame(&self, address: &RemoteAddress, frame: &Frame) {
        eprintln!("{address}: {} byte frame", frame.body.len());
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::global()
        .with_address(RemoteAddress::new("127.0.0.1", 7400))
        .with_options(ConnectionOptions {
            heartbeat_interval: Duration::from_secs(1),
            ..ConnectionOptions::default()
        });

    client.create_connection()?;
    client.subscribe(Arc::new(Printer))?;
    client.start_heartbeat("ping", None)?;

    for n in 0u32.. {
        thread::sleep(Duration::from_secs(3));
        if let Err(e) = client.send(format!("tick {n}")) {
            eprintln!("send skipped: {e}");
        }
    }
    Ok(())
}
