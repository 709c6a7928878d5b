use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Subcommand};
use relink_conn::{
    ConnError, ConnectionOptions, Endpoint, Frame, LinkFailure, RemoteAddress,
    SocketActionListener,
};
use relink_frame::{max_body_for_header, DEFAULT_HEADER_LENGTH, DEFAULT_MAX_BODY_LENGTH};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::{OutputFormat, WatchEvent};

pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect, send a single frame, optionally wait for a reply.
    Send(SendArgs),
    /// Hold a reconnecting connection and print events and frames.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where to connect and how to frame.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Remote endpoint as host:port.
    #[arg(env = "RELINK_ADDRESS", value_name = "HOST:PORT")]
    pub address: Endpoint,
    /// Failover endpoint tried on alternate reconnect attempts.
    #[arg(long, env = "RELINK_BACKUP", value_name = "HOST:PORT")]
    pub backup: Option<Endpoint>,
    /// Width of the length header in bytes (1..=8).
    #[arg(long, default_value_t = DEFAULT_HEADER_LENGTH)]
    pub header_length: usize,
    /// Bound on each connect attempt (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub connect_timeout: String,
    /// Log every frame at debug level.
    #[arg(long)]
    pub debug_frames: bool,
}

impl ConnectArgs {
    pub fn remote_address(&self) -> RemoteAddress {
        let address = RemoteAddress::from(self.address.clone());
        match &self.backup {
            Some(backup) => address.with_backup_endpoint(backup.clone()),
            None => address,
        }
    }

    /// Options shared by every command; callers adjust reconnect behavior.
    ///
    /// Narrow headers lower the body limit to what they can express.
    pub fn options(&self) -> CliResult<ConnectionOptions> {
        let max_frame_body_length = usize::try_from(max_body_for_header(self.header_length))
            .unwrap_or(usize::MAX)
            .min(DEFAULT_MAX_BODY_LENGTH);
        Ok(ConnectionOptions {
            connect_timeout: parse_duration(&self.connect_timeout)?,
            header_length: self.header_length,
            max_frame_body_length,
            debug: self.debug_frames,
            ..ConnectionOptions::default()
        })
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one reply frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Heartbeat payload to send every interval.
    #[arg(long)]
    pub heartbeat: Option<String>,
    /// Inbound body recognized as a heartbeat reply and not printed.
    #[arg(long, requires = "heartbeat")]
    pub heartbeat_reply: Option<String>,
    /// Heartbeat and liveness cadence (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub heartbeat_interval: String,
    /// Silent intervals tolerated before the link is declared dead.
    #[arg(long, default_value_t = 3)]
    pub heartbeat_misses: u32,
    /// First reconnect delay; doubles per attempt up to 30s.
    #[arg(long, default_value = "1s")]
    pub retry_delay: String,
    /// Give up after this many consecutive failed reconnects.
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// What a [`Forwarder`] hands to the command loop.
#[derive(Debug)]
pub enum Notice {
    Event(WatchEvent),
    Frame(Bytes),
}

/// Listener that moves callbacks onto a channel so the command thread can
/// print them in order.
pub struct Forwarder {
    tx: Sender<Notice>,
}

impl Forwarder {
    pub fn new(tx: Sender<Notice>) -> Self {
        Self { tx }
    }

    fn forward(&self, notice: Notice) {
        // The receiver is gone once the command is exiting.
        let _ = self.tx.send(notice);
    }
}

impl SocketActionListener for Forwarder {
    fn on_attached(&self, _address: &RemoteAddress, endpoint: &Endpoint) {
        self.forward(Notice::Event(WatchEvent::Attached {
            endpoint: endpoint.clone(),
        }));
    }

    fn on_connect_failed(
        &self,
        _address: &RemoteAddress,
        endpoint: &Endpoint,
        error: &ConnError,
        will_retry: bool,
    ) {
        self.forward(Notice::Event(WatchEvent::ConnectFailed {
            endpoint: endpoint.clone(),
            error: error.to_string(),
            will_retry,
        }));
    }

    fn on_detached(&self, _address: &RemoteAddress, cause: &LinkFailure, will_reconnect: bool) {
        self.forward(Notice::Event(WatchEvent::Detached {
            cause: cause.clone(),
            will_reconnect,
        }));
    }

    fn on_frame(&self, _address: &RemoteAddress, frame: &Frame) {
        self.forward(Notice::Frame(frame.body.clone()));
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
