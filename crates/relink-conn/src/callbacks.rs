//! Send completion callbacks and request/response correlation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use crate::error::{ConnError, Result};
use crate::signal::Signal;

/// What a callback-style send achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The framed payload was fully written to the socket.
    Written,
    /// The correlated response body.
    Reply(Bytes),
}

/// Completion callback for a send. Invoked exactly once.
pub type SendCallback = Box<dyn FnOnce(Result<Delivery>) + Send + 'static>;

/// A payload waiting in the outbound queue.
pub struct PendingSend {
    pub payload: Bytes,
    pub correlation_id: Option<String>,
    pub callback: Option<SendCallback>,
    pub enqueued_at: Instant,
}

impl PendingSend {
    /// A fire-and-forget payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            correlation_id: None,
            callback: None,
            enqueued_at: Instant::now(),
        }
    }

    /// Attach a completion callback.
    pub fn with_callback(mut self, callback: SendCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Resolve the callback with the response carrying `id` instead of on write.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Fail the callback, if there is one.
    pub(crate) fn fail(self, err: ConnError) {
        if let Some(callback) = self.callback {
            callback(Err(err));
        }
    }
}

impl fmt::Debug for PendingSend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSend")
            .field("len", &self.payload.len())
            .field("correlation_id", &self.correlation_id)
            .field("callback", &self.callback.is_some())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

struct Waiting {
    callback: SendCallback,
    registered_at: Instant,
}

/// Callbacks waiting for a correlated response.
#[derive(Default)]
pub(crate) struct ResponseTable {
    pending: Mutex<HashMap<String, Waiting>>,
}

impl ResponseTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park `callback` until a response with `id` arrives.
    ///
    /// A callback already waiting on the same id is cancelled.
    pub(crate) fn register(&self, id: String, callback: SendCallback) {
        let previous = self.lock().insert(
            id,
            Waiting {
                callback,
                registered_at: Instant::now(),
            },
        );
        if let Some(previous) = previous {
            (previous.callback)(Err(ConnError::Cancelled));
        }
    }

    /// Deliver `body` to the callback waiting on `id`. Returns whether one was waiting.
    pub(crate) fn resolve(&self, id: &str, body: Bytes) -> bool {
        let waiting = self.lock().remove(id);
        match waiting {
            Some(waiting) => {
                (waiting.callback)(Ok(Delivery::Reply(body)));
                true
            }
            None => false,
        }
    }

    /// Withdraw the callback waiting on `id` without resolving it.
    pub(crate) fn take(&self, id: &str) -> Option<SendCallback> {
        self.lock().remove(id).map(|waiting| waiting.callback)
    }

    /// Fail every callback registered more than `timeout` before `now`.
    pub(crate) fn expire(&self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<(String, Waiting)> = {
            let mut pending = self.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, w)| now.saturating_duration_since(w.registered_at) >= timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|w| (id, w)))
                .collect()
        };
        let count = expired.len();
        for (id, waiting) in expired {
            debug!(correlation_id = %id, "request timed out");
            (waiting.callback)(Err(ConnError::RequestTimeout(timeout)));
        }
        count
    }

    /// Fail every waiting callback with `Cancelled`.
    pub(crate) fn cancel_all(&self) {
        let drained: Vec<Waiting> = self.lock().drain().map(|(_, w)| w).collect();
        for waiting in drained {
            (waiting.callback)(Err(ConnError::Cancelled));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiting>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Timer thread that expires overdue correlated requests.
pub(crate) struct ResponseSweeper {
    stop: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl ResponseSweeper {
    pub(crate) fn start(table: Arc<ResponseTable>, timeout: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(Signal::new());
        let period = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_millis(250));
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("relink-sweeper".to_string())
                .spawn(move || {
                    while !stop.wait(period) {
                        table.expire(Instant::now(), timeout);
                    }
                })?
        };
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.handle.take() {
            crate::link::join_unless_current(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn capture() -> (SendCallback, mpsc::Receiver<Result<Delivery>>) {
        let (tx, rx) = mpsc::channel();
        let callback: SendCallback = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (callback, rx)
    }

    #[test]
    fn resolve_delivers_reply_once() {
        let table = ResponseTable::new();
        let (callback, rx) = capture();
        table.register("req-1".to_string(), callback);

        assert!(table.resolve("req-1", Bytes::from_static(b"pong")));
        assert!(!table.resolve("req-1", Bytes::from_static(b"again")));

        let result = rx.recv().unwrap().unwrap();
        assert_eq!(result, Delivery::Reply(Bytes::from_static(b"pong")));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn take_withdraws_without_calling() {
        let table = ResponseTable::new();
        let (callback, rx) = capture();
        table.register("w".to_string(), callback);

        let callback = table.take("w").expect("callback should be waiting");
        assert!(rx.try_recv().is_err());
        callback(Err(ConnError::Cancelled));
        assert!(matches!(rx.recv().unwrap(), Err(ConnError::Cancelled)));
        assert!(table.take("w").is_none());
    }

    #[test]
    fn unknown_id_is_not_consumed() {
        let table = ResponseTable::new();
        assert!(!table.resolve("nobody", Bytes::new()));
    }

    #[test]
    fn expire_only_overdue() {
        let table = ResponseTable::new();
        let (old_cb, old_rx) = capture();
        table.register("old".to_string(), old_cb);
        std::thread::sleep(Duration::from_millis(30));
        let (new_cb, new_rx) = capture();
        table.register("new".to_string(), new_cb);

        let expired = table.expire(Instant::now(), Duration::from_millis(25));
        assert_eq!(expired, 1);
        assert!(matches!(
            old_rx.recv().unwrap(),
            Err(ConnError::RequestTimeout(_))
        ));
        assert!(new_rx.try_recv().is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cancel_all_fails_everything() {
        let table = ResponseTable::new();
        let (a, a_rx) = capture();
        let (b, b_rx) = capture();
        table.register("a".to_string(), a);
        table.register("b".to_string(), b);

        table.cancel_all();

        assert!(matches!(a_rx.recv().unwrap(), Err(ConnError::Cancelled)));
        assert!(matches!(b_rx.recv().unwrap(), Err(ConnError::Cancelled)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn duplicate_id_cancels_previous_waiter() {
        let table = ResponseTable::new();
        let (first, first_rx) = capture();
        let (second, second_rx) = capture();
        table.register("dup".to_string(), first);
        table.register("dup".to_string(), second);

        assert!(matches!(first_rx.recv().unwrap(), Err(ConnError::Cancelled)));
        assert!(table.resolve("dup", Bytes::from_static(b"x")));
        assert!(second_rx.recv().unwrap().is_ok());
    }

    #[test]
    fn sweeper_expires_in_background() {
        let table = Arc::new(ResponseTable::new());
        let (callback, rx) = capture();
        table.register("slow".to_string(), callback);

        let mut sweeper =
            ResponseSweeper::start(Arc::clone(&table), Duration::from_millis(40)).unwrap();
        let result = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sweeper.stop();

        assert!(matches!(result, Err(ConnError::RequestTimeout(_))));
    }

    #[test]
    fn pending_send_fail_invokes_callback() {
        let (callback, rx) = capture();
        PendingSend::new("x").with_callback(callback).fail(ConnError::Cancelled);
        assert!(matches!(rx.recv().unwrap(), Err(ConnError::Cancelled)));

        // No callback: nothing to call, nothing panics.
        PendingSend::new("y").fail(ConnError::Cancelled);
    }
}
