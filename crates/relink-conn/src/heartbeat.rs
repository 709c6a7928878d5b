//! Heartbeat pings and silent-link detection.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::callbacks::PendingSend;
use crate::error::LinkFailure;
use crate::link::{join_unless_current, LinkEvents};
use crate::outbound::OutboundWriter;
use crate::signal::Signal;

/// Recognizes heartbeat replies so they stay out of application dispatch.
pub trait HeartbeatListener: Send + Sync {
    /// Whether `body` answers a heartbeat ping.
    ///
    /// Replies still count as inbound activity either way.
    fn is_heartbeat_reply(&self, body: &[u8]) -> bool {
        let _ = body;
        false
    }
}

/// Heartbeat settings kept by the manager across reconnects.
#[derive(Clone)]
pub(crate) struct HeartbeatSetup {
    pub(crate) payload: Bytes,
    pub(crate) listener: Option<Arc<dyn HeartbeatListener>>,
}

impl fmt::Debug for HeartbeatSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatSetup")
            .field("payload_len", &self.payload.len())
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Outcome of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Traffic seen within the last interval.
    Alive,
    /// Another silent interval; `n` consecutive so far.
    Missed(u32),
    /// Threshold reached. Returned once.
    TimedOut(u32),
    /// Already timed out; nothing more to do.
    Halted,
}

/// Liveness bookkeeping, separate from the timer so it can be driven directly.
#[derive(Debug)]
pub(crate) struct Liveness {
    interval: Duration,
    threshold: u32,
    last_activity: Instant,
    missed: u32,
    timed_out: bool,
}

impl Liveness {
    pub(crate) fn new(interval: Duration, threshold: u32, now: Instant) -> Self {
        Self {
            interval,
            threshold: threshold.max(1),
            last_activity: now,
            missed: 0,
            timed_out: false,
        }
    }

    /// Any inbound frame resets the silence counter.
    pub(crate) fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.missed = 0;
    }

    pub(crate) fn tick(&mut self, now: Instant) -> Tick {
        if self.timed_out {
            return Tick::Halted;
        }
        if now.saturating_duration_since(self.last_activity) <= self.interval {
            return Tick::Alive;
        }
        self.missed += 1;
        if self.missed >= self.threshold {
            self.timed_out = true;
            Tick::TimedOut(self.missed)
        } else {
            Tick::Missed(self.missed)
        }
    }

    #[cfg(test)]
    pub(crate) fn missed(&self) -> u32 {
        self.missed
    }
}

/// Ticker thread for one link.
///
/// Runs apart from the reader and writer threads, so a blocked socket write
/// cannot stall liveness accounting.
pub(crate) struct HeartbeatMonitor {
    liveness: Arc<Mutex<Liveness>>,
    listener: Option<Arc<dyn HeartbeatListener>>,
    stop: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatMonitor {
    pub(crate) fn start(
        setup: &HeartbeatSetup,
        interval: Duration,
        threshold: u32,
        writer: Arc<OutboundWriter>,
        events: Arc<dyn LinkEvents>,
    ) -> std::io::Result<Self> {
        let liveness = Arc::new(Mutex::new(Liveness::new(
            interval,
            threshold,
            Instant::now(),
        )));
        let stop = Arc::new(Signal::new());

        let handle = {
            let liveness = Arc::clone(&liveness);
            let stop = Arc::clone(&stop);
            let payload = setup.payload.clone();
            std::thread::Builder::new()
                .name("relink-heartbeat".to_string())
                .spawn(move || {
                    while !stop.wait(interval) {
                        let tick = liveness
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .tick(Instant::now());
                        match tick {
                            Tick::TimedOut(missed) => {
                                if !stop.is_raised() {
                                    warn!(missed, "heartbeat timed out");
                                    events.on_failure(LinkFailure::HeartbeatTimeout { missed });
                                }
                                break;
                            }
                            Tick::Halted => break,
                            Tick::Missed(missed) => debug!(missed, "heartbeat interval missed"),
                            Tick::Alive => {}
                        }
                        if writer.enqueue(PendingSend::new(payload.clone())).is_err() {
                            break;
                        }
                    }
                })?
        };

        Ok(Self {
            liveness,
            listener: setup.listener.clone(),
            stop,
            handle: Some(handle),
        })
    }

    pub(crate) fn record_activity(&self) {
        self.liveness
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_activity(Instant::now());
    }

    /// Whether `body` is a heartbeat reply to swallow.
    pub(crate) fn consumes(&self, body: &[u8]) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| listener.is_heartbeat_reply(body))
    }

    /// Stop ticking. Safe from any state and any thread.
    pub(crate) fn stop(mut self) {
        self.stop.raise();
        if let Some(handle) = self.handle.take() {
            join_unless_current(handle);
        }
    }
}
