//! Receive loop: socket bytes in, decoded frames out.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use relink_frame::FrameReader;
use tracing::debug;

use crate::error::LinkFailure;
use crate::link::{join_unless_current, LinkEvents};
use crate::signal::Signal;

/// Dedicated receive thread for one link.
///
/// The thread parks until [`InboundReader::release`] so the owner can finish
/// attaching before the first frame is dispatched. It reports at most one
/// failure and never reconnects on its own.
pub(crate) struct InboundReader {
    stopped: Arc<AtomicBool>,
    gate: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl InboundReader {
    pub(crate) fn start<R>(
        reader: FrameReader<R>,
        events: Arc<dyn LinkEvents>,
        debug_frames: bool,
    ) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let gate = Arc::new(Signal::new());

        let handle = {
            let stopped = Arc::clone(&stopped);
            let gate = Arc::clone(&gate);
            std::thread::Builder::new()
                .name("relink-reader".to_string())
                .spawn(move || {
                    gate.wait_raised();
                    receive_loop(reader, events.as_ref(), &stopped, debug_frames);
                })?
        };

        Ok(Self {
            stopped,
            gate,
            handle: Some(handle),
        })
    }

    /// Let the thread begin dispatching.
    pub(crate) fn release(&self) {
        self.gate.raise();
    }

    /// Stop dispatching and suppress the failure report.
    ///
    /// A frame that was already past the stop check may still be delivered;
    /// only after [`join`](Self::join) is the thread quiet. Callers that need
    /// a hard cut-off filter by link epoch. A read blocked on the socket only
    /// returns once the socket is shut down.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.gate.raise();
    }

    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}

fn receive_loop<R: Read>(
    mut reader: FrameReader<R>,
    events: &dyn LinkEvents,
    stopped: &AtomicBool,
    debug_frames: bool,
) {
    while !stopped.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(frame) => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                if debug_frames {
                    debug!(len = frame.body_length(), "frame received");
                }
                events.on_frame(frame);
            }
            Err(err) => {
                if !stopped.load(Ordering::SeqCst) {
                    let cause = LinkFailure::from_read_error(&err);
                    debug!(cause = cause.kind(), error = %err, "receive loop ended");
                    events.on_failure(cause);
                }
                break;
            }
        }
    }
}
