//! Connection lifecycle: connect, detect loss, back off, fail over.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use relink_frame::{Frame, FrameError};
use relink_transport::{Endpoint, RemoteAddress};
use tracing::{debug, error, info, warn};

use crate::callbacks::{Delivery, PendingSend};
use crate::error::{ConnError, LinkFailure, Result};
use crate::heartbeat::{HeartbeatListener, HeartbeatSetup};
use crate::link::{Link, LinkEvents};
use crate::listener::{ListenerSet, SocketActionListener};
use crate::options::ConnectionOptions;
use crate::state::ConnectionState;

/// Owns the link to one remote address and keeps it alive.
///
/// Cloning is cheap; clones share the same connection. All methods are safe
/// to call from any thread, including from listener and send callbacks.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    address: RemoteAddress,
    options: ConnectionOptions,
    core: Mutex<Core>,
    wake: Condvar,
    listeners: ListenerSet,
}

struct Core {
    state: ConnectionState,
    /// Bumped on every transition that invalidates in-flight work.
    epoch: u64,
    link: Option<Link>,
    heartbeat: Option<HeartbeatSetup>,
}

/// Forwards link events to the manager that opened the link, if it still
/// owns it.
struct Relay {
    shared: Weak<Shared>,
    epoch: u64,
}

impl LinkEvents for Relay {
    fn on_frame(&self, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.dispatch(self.epoch, &frame);
        }
    }

    fn on_failure(&self, cause: LinkFailure) {
        if let Some(shared) = self.shared.upgrade() {
            shared.link_failed(self.epoch, cause);
        }
    }
}

impl ConnectionManager {
    /// Create an idle manager. Fails if `options` do not validate.
    pub fn new(address: RemoteAddress, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                address,
                options,
                core: Mutex::new(Core {
                    state: ConnectionState::Idle,
                    epoch: 0,
                    link: None,
                    heartbeat: None,
                }),
                wake: Condvar::new(),
                listeners: ListenerSet::default(),
            }),
        })
    }

    pub fn address(&self) -> &RemoteAddress {
        &self.shared.address
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Endpoint of the live link: the primary, or the backup after failover.
    pub fn active_endpoint(&self) -> Option<Endpoint> {
        self.shared
            .lock()
            .link
            .as_ref()
            .map(|link| link.endpoint().clone())
    }

    /// Correlated requests still waiting for a reply on the live link.
    pub fn pending_requests(&self) -> usize {
        self.shared
            .lock()
            .link
            .as_ref()
            .map_or(0, Link::pending_requests)
    }

    /// Open a link to the primary endpoint.
    ///
    /// A no-op while connecting, connected or reconnecting. On failure the
    /// manager returns to `Idle` and nothing is retried. Returns `Cancelled`
    /// if `disconnect` won the race.
    pub fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        let epoch = {
            let mut core = shared.lock();
            if core.state.is_active() {
                debug!(address = %shared.address, state = %core.state, "already active, connect ignored");
                return Ok(());
            }
            core.epoch += 1;
            core.state = ConnectionState::Connecting;
            core.epoch
        };

        let endpoint = shared.address.primary().clone();
        info!(address = %shared.address, epoch, "connecting");
        match shared.establish(&endpoint, epoch) {
            Ok(()) => Ok(()),
            Err(ConnError::Cancelled) => Err(ConnError::Cancelled),
            Err(err) => {
                {
                    let mut core = shared.lock();
                    if core.epoch == epoch && core.state == ConnectionState::Connecting {
                        core.state = ConnectionState::Idle;
                    }
                }
                warn!(address = %shared.address, endpoint = %endpoint, error = %err, "connect failed");
                shared
                    .listeners
                    .each(|l| l.on_connect_failed(&shared.address, &endpoint, &err, false));
                Err(err)
            }
        }
    }

    /// Tear the link down.
    ///
    /// With `reconnect` the manager enters `Reconnecting` and runs one backoff
    /// cycle; otherwise it ends `Disconnected`. An in-flight connect or
    /// backoff wait is abandoned. A no-op when idle or already disconnected.
    pub fn disconnect(&self, reconnect: bool) {
        let shared = &self.shared;
        let (previous, epoch, link) = {
            let mut core = shared.lock();
            let previous = core.state;
            if !previous.is_active() {
                debug!(address = %shared.address, state = %previous, "not active, disconnect ignored");
                return;
            }
            core.epoch += 1;
            core.state = if reconnect {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            shared.wake.notify_all();
            (previous, core.epoch, core.link.take())
        };

        info!(address = %shared.address, reconnect, from = %previous, "disconnect requested");
        if let Some(link) = link {
            link.teardown();
        }
        if previous == ConnectionState::Connected {
            shared
                .listeners
                .each(|l| l.on_detached(&shared.address, &LinkFailure::Requested, reconnect));
        }
        if reconnect {
            shared.spawn_reconnect(epoch);
        }
    }

    /// Queue `payload` for sending.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.submit(PendingSend::new(payload))
    }

    /// Queue `payload`; `callback` runs once it is written or has failed.
    ///
    /// When this returns an error the callback is not invoked, except if the
    /// link closed concurrently, in which case it also receives `Cancelled`.
    pub fn send_with_callback<F>(&self, payload: impl Into<Bytes>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Delivery>) + Send + 'static,
    {
        self.submit(PendingSend::new(payload).with_callback(Box::new(callback)))
    }

    /// Queue `payload`; `callback` receives the inbound frame whose
    /// correlation id equals `correlation_id`.
    ///
    /// Requires [`ConnectionOptions::correlation`]. The callback fails with
    /// `RequestTimeout` after [`ConnectionOptions::request_timeout`], and with
    /// `Cancelled` if the link goes away first.
    pub fn send_request<F>(
        &self,
        payload: impl Into<Bytes>,
        correlation_id: impl Into<String>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(Result<Delivery>) + Send + 'static,
    {
        if self.shared.options.correlation.is_none() {
            return Err(ConnError::InvalidOptions(
                "send_request needs a correlation extractor".to_string(),
            ));
        }
        self.submit(
            PendingSend::new(payload)
                .with_correlation(correlation_id)
                .with_callback(Box::new(callback)),
        )
    }

    /// Add a lifecycle/frame listener. Listeners run in subscription order.
    pub fn subscribe(&self, listener: Arc<dyn SocketActionListener>) {
        self.shared.listeners.add(listener);
    }

    /// Ping with `payload` every `heartbeat_interval` and watch for silence.
    ///
    /// The setting survives reconnects. Calling again replaces it.
    pub fn start_heartbeat(
        &self,
        payload: impl Into<Bytes>,
        listener: Option<Arc<dyn HeartbeatListener>>,
    ) -> Result<()> {
        let setup = HeartbeatSetup {
            payload: payload.into(),
            listener,
        };
        let replaced = {
            let mut core = self.shared.lock();
            core.heartbeat = Some(setup.clone());
            match core.link.as_ref() {
                Some(link) => link.start_heartbeat(&setup)?,
                None => None,
            }
        };
        if let Some(monitor) = replaced {
            monitor.stop();
        }
        Ok(())
    }

    pub fn stop_heartbeat(&self) {
        let monitor = {
            let mut core = self.shared.lock();
            core.heartbeat = None;
            core.link.as_ref().and_then(Link::take_heartbeat)
        };
        if let Some(monitor) = monitor {
            monitor.stop();
        }
    }

    fn submit(&self, item: PendingSend) -> Result<()> {
        let max = self.shared.options.max_frame_body_length;
        if item.payload.len() > max {
            return Err(ConnError::Frame(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max,
            }));
        }
        let writer = {
            let core = self.shared.lock();
            match (core.state, core.link.as_ref()) {
                (ConnectionState::Connected, Some(link)) => link.writer(),
                _ => return Err(ConnError::NoActiveConnection),
            }
        };
        writer.enqueue(item)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.shared.address)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    /// Connect to `endpoint` and install the link if `epoch` is still current.
    fn establish(self: &Arc<Self>, endpoint: &Endpoint, epoch: u64) -> Result<()> {
        let stream = relink_transport::connect(endpoint, self.options.connect_timeout)?;

        let relay = Arc::new(Relay {
            shared: Arc::downgrade(self),
            epoch,
        });
        let link = Link::open(stream, endpoint.clone(), &self.options, relay)?;

        {
            let mut core = self.lock();
            if core.epoch != epoch {
                drop(core);
                debug!(address = %self.address, endpoint = %endpoint, "attempt superseded, closing");
                link.teardown();
                return Err(ConnError::Cancelled);
            }
            if let Some(setup) = core.heartbeat.clone() {
                if let Err(err) = link.start_heartbeat(&setup) {
                    warn!(address = %self.address, error = %err, "heartbeat not started");
                }
            }
            core.state = ConnectionState::Connected;
            core.link = Some(link);
        }

        info!(address = %self.address, endpoint = %endpoint, epoch, "connected");
        self.listeners
            .each(|l| l.on_attached(&self.address, endpoint));

        let core = self.lock();
        if core.epoch == epoch {
            if let Some(link) = core.link.as_ref() {
                link.release();
            }
        }
        Ok(())
    }

    fn dispatch(&self, epoch: u64, frame: &Frame) {
        if !self.is_current(epoch) {
            return;
        }
        self.listeners
            .each(|l| l.on_frame(&self.address, frame));
    }

    fn link_failed(self: &Arc<Self>, epoch: u64, cause: LinkFailure) {
        let (epoch, link) = {
            let mut core = self.lock();
            if core.epoch != epoch || core.state != ConnectionState::Connected {
                return;
            }
            core.epoch += 1;
            core.state = if self.options.reconnect_enabled {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Disconnected
            };
            (core.epoch, core.link.take())
        };

        let reconnect = self.options.reconnect_enabled;
        warn!(address = %self.address, cause = %cause, epoch, reconnect, "link lost");
        if let Some(link) = link {
            link.teardown();
        }
        self.listeners
            .each(|l| l.on_detached(&self.address, &cause, reconnect));
        if reconnect {
            self.spawn_reconnect(epoch);
        }
    }

    fn spawn_reconnect(self: &Arc<Self>, epoch: u64) {
        let shared = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("relink-reconnect".to_string())
            .spawn(move || shared.reconnect_loop(epoch));

        if let Err(err) = spawned {
            error!(address = %self.address, error = %err, "reconnect worker not started");
            if self.finish(epoch) {
                let cause = LinkFailure::Io(format!("reconnect worker not started: {err}"));
                self.listeners
                    .each(|l| l.on_detached(&self.address, &cause, false));
            }
        }
    }

    fn reconnect_loop(self: Arc<Self>, epoch: u64) {
        let policy = &self.options.reconnect_backoff;
        let mut attempt = 0u32;
        loop {
            let Some(delay) = policy.delay_for(attempt) else {
                if self.finish(epoch) {
                    warn!(address = %self.address, attempts = attempt, "reconnect attempts exhausted");
                    let cause = LinkFailure::ReconnectExhausted { attempts: attempt };
                    self.listeners
                        .each(|l| l.on_detached(&self.address, &cause, false));
                }
                return;
            };

            debug!(address = %self.address, attempt, ?delay, "backing off");
            if !self.wait_backoff(epoch, delay) {
                debug!(address = %self.address, attempt, "reconnect cancelled");
                return;
            }

            let endpoint = self.address.endpoint_for_attempt(attempt).clone();
            info!(address = %self.address, endpoint = %endpoint, attempt, "reconnecting");
            match self.establish(&endpoint, epoch) {
                Ok(()) | Err(ConnError::Cancelled) => return,
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    if !self.is_current(epoch) {
                        return;
                    }
                    let will_retry = policy.delay_for(attempt).is_some();
                    warn!(address = %self.address, endpoint = %endpoint, error = %err, will_retry, "reconnect attempt failed");
                    self.listeners.each(|l| {
                        l.on_connect_failed(&self.address, &endpoint, &err, will_retry)
                    });
                }
            }
        }
    }

    /// Sleep for `delay` unless `epoch` is superseded first. Returns whether
    /// `epoch` is still current.
    fn wait_backoff(&self, epoch: u64, delay: Duration) -> bool {
        let core = self.lock();
        let (core, _) = self
            .wake
            .wait_timeout_while(core, delay, |core| core.epoch == epoch)
            .unwrap_or_else(PoisonError::into_inner);
        core.epoch == epoch
    }

    /// End a reconnect episode in `Disconnected`. Returns `false` if the
    /// episode was already superseded.
    fn finish(&self, epoch: u64) -> bool {
        let mut core = self.lock();
        if core.epoch != epoch || core.state != ConnectionState::Reconnecting {
            return false;
        }
        core.epoch += 1;
        core.state = ConnectionState::Disconnected;
        true
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let link = self
            .core
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .link
            .take();
        if let Some(link) = link {
            link.teardown();
        }
    }
}
