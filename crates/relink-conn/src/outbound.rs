//! Ordered outbound queue drained by a single send thread.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use relink_frame::{FrameError, FrameWriter};
use tracing::{debug, warn};

use crate::callbacks::{Delivery, PendingSend, ResponseTable, SendCallback};
use crate::error::{ConnError, LinkFailure, Result};
use crate::link::{join_unless_current, LinkEvents};

#[derive(Default)]
struct Queue {
    items: VecDeque<PendingSend>,
    closed: bool,
}

/// FIFO of pending sends plus the thread that writes them.
///
/// `enqueue` never touches the socket. Exactly one thread performs writes, so
/// a payload enqueued before another is fully on the wire before it.
#[derive(Default)]
pub(crate) struct OutboundWriter {
    queue: Mutex<Queue>,
    ready: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OutboundWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawn the send loop over `writer`.
    ///
    /// Correlated sends are parked in `responses` before their bytes are
    /// written. Write failures are reported to `events` once.
    pub(crate) fn start<W>(
        self: &Arc<Self>,
        writer: FrameWriter<W>,
        responses: Arc<ResponseTable>,
        events: Arc<dyn LinkEvents>,
        debug_frames: bool,
    ) -> std::io::Result<()>
    where
        W: Write + Send + 'static,
    {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("relink-writer".to_string())
            .spawn(move || this.run(writer, &responses, events.as_ref(), debug_frames))?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Append `item` to the queue.
    ///
    /// After `close` the item's callback receives `Cancelled` and the call
    /// returns `NoActiveConnection`.
    pub(crate) fn enqueue(&self, item: PendingSend) -> Result<()> {
        let mut queue = self.lock();
        if queue.closed {
            drop(queue);
            item.fail(ConnError::Cancelled);
            return Err(ConnError::NoActiveConnection);
        }
        queue.items.push_back(item);
        self.ready.notify_one();
        Ok(())
    }

    /// Stop accepting sends and fail everything still queued with `Cancelled`.
    ///
    /// Idempotent. A write already in progress is not interrupted; shut the
    /// socket down to unblock it.
    pub(crate) fn close(&self) {
        let drained = {
            let mut queue = self.lock();
            queue.closed = true;
            self.ready.notify_all();
            std::mem::take(&mut queue.items)
        };
        for item in drained {
            item.fail(ConnError::Cancelled);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.lock().items.len()
    }

    /// Wait for the send thread to exit, unless called from it.
    pub(crate) fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            join_unless_current(handle);
        }
    }

    fn run<W: Write>(
        &self,
        mut writer: FrameWriter<W>,
        responses: &ResponseTable,
        events: &dyn LinkEvents,
        debug_frames: bool,
    ) {
        while let Some(item) = self.next() {
            let PendingSend {
                payload,
                correlation_id,
                callback,
                ..
            } = item;

            // Park before writing so a fast reply cannot beat the registration.
            let (callback, parked) = match (correlation_id, callback) {
                (Some(id), Some(callback)) => {
                    responses.register(id.clone(), callback);
                    (None, Some(id))
                }
                (_, callback) => (callback, None),
            };

            match writer.send(&payload) {
                Ok(()) => {
                    if debug_frames {
                        debug!(len = payload.len(), "frame sent");
                    }
                    if let Some(callback) = callback {
                        callback(Ok(Delivery::Written));
                    }
                }
                Err(FrameError::PayloadTooLarge { size, max }) => {
                    let err = ConnError::Frame(FrameError::PayloadTooLarge { size, max });
                    let callback = callback.or_else(|| parked.and_then(|id| responses.take(&id)));
                    if let Some(callback) = callback {
                        callback(Err(err));
                    }
                }
                Err(err) => {
                    let callback = callback.or_else(|| parked.and_then(|id| responses.take(&id)));
                    self.fail(err, callback, events);
                    return;
                }
            }
        }
    }

    /// Block until an item is available. `None` once closed.
    fn next(&self) -> Option<PendingSend> {
        let mut queue = self.lock();
        loop {
            if queue.closed {
                return None;
            }
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn fail(
        &self,
        err: FrameError,
        callback: Option<SendCallback>,
        events: &dyn LinkEvents,
    ) {
        let (was_closed, drained) = {
            let mut queue = self.lock();
            let was_closed = queue.closed;
            queue.closed = true;
            (was_closed, std::mem::take(&mut queue.items))
        };

        if was_closed {
            // Teardown shut the socket under us.
            if let Some(callback) = callback {
                callback(Err(ConnError::Cancelled));
            }
            return;
        }

        let cause = LinkFailure::WriteFailure(err.to_string());
        warn!(error = %err, pending = drained.len(), "send failed");
        if let Some(callback) = callback {
            callback(Err(ConnError::Link(cause.clone())));
        }
        for item in drained {
            item.fail(ConnError::Link(cause.clone()));
        }
        events.on_failure(cause);
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
