use std::sync::{Arc, Mutex, PoisonError};

use relink_frame::Frame;
use relink_transport::{Endpoint, RemoteAddress};

use crate::error::{ConnError, LinkFailure};

/// Observer of connection lifecycle events and inbound frames.
///
/// Every method has a no-op default. Callbacks may arrive on different
/// threads; frames for one connection always arrive in wire order.
pub trait SocketActionListener: Send + Sync {
    /// A link to `endpoint` is up and the manager is `Connected`.
    fn on_attached(&self, address: &RemoteAddress, endpoint: &Endpoint) {
        let _ = (address, endpoint);
    }

    /// A connect attempt to `endpoint` failed.
    fn on_connect_failed(
        &self,
        address: &RemoteAddress,
        endpoint: &Endpoint,
        error: &ConnError,
        will_retry: bool,
    ) {
        let _ = (address, endpoint, error, will_retry);
    }

    /// The manager left `Connected`, or gave up reconnecting.
    fn on_detached(&self, address: &RemoteAddress, cause: &LinkFailure, will_reconnect: bool) {
        let _ = (address, cause, will_reconnect);
    }

    /// An application frame arrived.
    fn on_frame(&self, address: &RemoteAddress, frame: &Frame) {
        let _ = (address, frame);
    }
}

/// Ordered listener list. Dispatch runs on a snapshot, outside the lock.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn SocketActionListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn SocketActionListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn SocketActionListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn each(&self, mut f: impl FnMut(&dyn SocketActionListener)) {
        for listener in self.snapshot() {
            f(listener.as_ref());
        }
    }
}
