//! One live socket and the threads that serve it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use relink_frame::{Frame, FrameReader, FrameWriter};
use relink_transport::{Endpoint, LinkStream, TransportError};
use tracing::{debug, warn};

use crate::callbacks::{ResponseSweeper, ResponseTable};
use crate::error::{ConnError, LinkFailure, Result};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatSetup};
use crate::inbound::InboundReader;
use crate::options::{ConnectionOptions, CorrelationExtractor};
use crate::outbound::OutboundWriter;

/// Sink for what the link threads observe.
pub(crate) trait LinkEvents: Send + Sync {
    fn on_frame(&self, frame: Frame);
    fn on_failure(&self, cause: LinkFailure);
}

/// Join `handle` unless it is the calling thread.
pub(crate) fn join_unless_current(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    let name = handle.thread().name().unwrap_or("relink").to_string();
    if handle.join().is_err() {
        warn!(thread = %name, "link thread panicked");
    }
}

/// State shared by the link threads.
struct LinkCore {
    writer: Arc<OutboundWriter>,
    heartbeat: Mutex<Option<HeartbeatMonitor>>,
    responses: Arc<ResponseTable>,
    correlation: Option<Arc<dyn CorrelationExtractor>>,
    upstream: Arc<dyn LinkEvents>,
    failed: AtomicBool,
}

impl LinkCore {
    fn heartbeat(&self) -> MutexGuard<'_, Option<HeartbeatMonitor>> {
        self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LinkEvents for LinkCore {
    fn on_frame(&self, frame: Frame) {
        if let Some(monitor) = self.heartbeat().as_ref() {
            monitor.record_activity();
            if monitor.consumes(&frame.body) {
                return;
            }
        }

        if let Some(extractor) = &self.correlation {
            if let Some(id) = extractor.correlation_id(&frame.body) {
                if self.responses.resolve(&id, frame.body.clone()) {
                    return;
                }
            }
        }

        self.upstream.on_frame(frame);
    }

    fn on_failure(&self, cause: LinkFailure) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.upstream.on_failure(cause);
        }
    }
}

/// A connected socket with its reader, writer, heartbeat and sweeper threads.
pub(crate) struct Link {
    endpoint: Endpoint,
    stream: LinkStream,
    core: Arc<LinkCore>,
    reader: InboundReader,
    sweeper: Option<ResponseSweeper>,
    heartbeat_interval: std::time::Duration,
    heartbeat_threshold: u32,
}

impl Link {
    /// Start the pipeline over a freshly connected `stream`.
    ///
    /// The reader stays parked until [`Link::release`].
    pub(crate) fn open(
        stream: LinkStream,
        endpoint: Endpoint,
        options: &ConnectionOptions,
        upstream: Arc<dyn LinkEvents>,
    ) -> Result<Self> {
        let config = options.frame_config();
        let reader = FrameReader::with_config_link(stream.try_clone()?, &config)?;
        let writer = FrameWriter::with_config_link(stream.try_clone()?, &config)?;

        let core = Arc::new(LinkCore {
            writer: Arc::new(OutboundWriter::new()),
            heartbeat: Mutex::new(None),
            responses: Arc::new(ResponseTable::new()),
            correlation: options.correlation.clone(),
            upstream,
            failed: AtomicBool::new(false),
        });
        let events: Arc<dyn LinkEvents> = core.clone();

        if let Err(err) = core.writer.start(
            writer,
            Arc::clone(&core.responses),
            Arc::clone(&events),
            options.debug,
        ) {
            let _ = stream.shutdown();
            return Err(spawn_error(err));
        }

        let reader = match InboundReader::start(reader, Arc::clone(&events), options.debug) {
            Ok(reader) => reader,
            Err(err) => {
                abort(&core, &stream);
                return Err(spawn_error(err));
            }
        };

        let mut link = Self {
            endpoint,
            stream,
            core,
            reader,
            sweeper: None,
            heartbeat_interval: options.heartbeat_interval,
            heartbeat_threshold: options.heartbeat_miss_threshold,
        };

        if let Some(timeout) = options.request_timeout {
            match ResponseSweeper::start(Arc::clone(&link.core.responses), timeout) {
                Ok(sweeper) => link.sweeper = Some(sweeper),
                Err(err) => {
                    link.teardown();
                    return Err(spawn_error(err));
                }
            }
        }

        Ok(link)
    }

    /// Let the reader start dispatching frames.
    pub(crate) fn release(&self) {
        self.reader.release();
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn writer(&self) -> Arc<OutboundWriter> {
        Arc::clone(&self.core.writer)
    }

    pub(crate) fn pending_requests(&self) -> usize {
        self.core.responses.len()
    }

    /// Start (or restart) the heartbeat monitor.
    ///
    /// Returns the monitor it replaced; stop it without holding any lock the
    /// heartbeat thread may need.
    pub(crate) fn start_heartbeat(
        &self,
        setup: &HeartbeatSetup,
    ) -> Result<Option<HeartbeatMonitor>> {
        let events: Arc<dyn LinkEvents> = self.core.clone();
        let monitor = HeartbeatMonitor::start(
            setup,
            self.heartbeat_interval,
            self.heartbeat_threshold,
            self.writer(),
            events,
        )
        .map_err(spawn_error)?;
        Ok(self.core.heartbeat().replace(monitor))
    }

    pub(crate) fn take_heartbeat(&self) -> Option<HeartbeatMonitor> {
        self.core.heartbeat().take()
    }

    /// Stop every thread and close the socket.
    ///
    /// Order: heartbeat, writer (queued sends cancelled), reader, socket,
    /// then joins. Safe to call from one of the link's own threads.
    pub(crate) fn teardown(mut self) {
        debug!(endpoint = %self.endpoint, "tearing down link");

        if let Some(monitor) = self.take_heartbeat() {
            monitor.stop();
        }
        self.core.writer.close();
        self.reader.stop();
        if let Err(err) = self.stream.shutdown() {
            debug!(error = %err, "socket shutdown failed");
        }

        self.core.writer.join();
        self.reader.join();
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        self.core.responses.cancel_all();
    }
}

fn abort(core: &LinkCore, stream: &LinkStream) {
    core.writer.close();
    let _ = stream.shutdown();
    core.writer.join();
}

fn spawn_error(err: std::io::Error) -> ConnError {
    ConnError::Transport(TransportError::Io(err))
}
