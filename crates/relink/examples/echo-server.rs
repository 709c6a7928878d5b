//! Minimal framed echo server: accepts clients one at a time and echoes
//! every frame back.
//!
//! Run with:
//!   cargo run --example echo-server
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:7400 \
//!     --json '{"hello":"world"}' --wait --wait-timeout 3s

use std::net::TcpListener;

use relink::frame::{FrameError, FrameReader, FrameWriter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:7400")?;
    eprintln!("Listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let stream = stream?;
        let peer = stream.peer_addr()?;
        eprintln!("Client connected: {peer}");

        let mut reader = FrameReader::new(stream.try_clone()?);
        let mut writer = FrameWriter::new(stream);
        loop {
            match reader.read_frame() {
                Ok(frame) => {
                    eprintln!("Received {} bytes", frame.body.len());
                    writer.write_frame(&frame)?;
                }
                Err(FrameError::ConnectionClosed) => {
                    eprintln!("Client disconnected: {peer}");
                    break;
                }
                Err(e) => {
                    eprintln!("Dropping {peer}: {e}");
                    break;
                }
            }
        }
    }

    Ok(())
}
