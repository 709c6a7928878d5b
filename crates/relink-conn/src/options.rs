use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relink_frame::{FrameCodec, FrameConfig, DEFAULT_HEADER_LENGTH, DEFAULT_MAX_BODY_LENGTH};

use crate::error::{ConnError, Result};

/// Pulls a correlation id out of an inbound body so it can be matched with
/// an outstanding [`crate::ConnectionManager::send_request`].
pub trait CorrelationExtractor: Send + Sync {
    /// The id carried by `body`, if any.
    fn correlation_id(&self, body: &[u8]) -> Option<String>;
}

/// Delay sequence applied between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay before every attempt.
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
    /// Delay doubles after each failed attempt, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        max_attempts: Option<u32>,
    },
}

impl BackoffPolicy {
    /// Delay before zero-based `attempt`, or `None` once attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match self {
            BackoffPolicy::Fixed {
                delay,
                max_attempts,
            } => within(attempt, *max_attempts).then_some(*delay),
            BackoffPolicy::Exponential {
                initial,
                max,
                max_attempts,
            } => {
                if !within(attempt, *max_attempts) {
                    return None;
                }
                let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
                Some(initial.saturating_mul(factor).min(*max))
            }
        }
    }

    /// Attempt cap, if any.
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            BackoffPolicy::Fixed { max_attempts, .. }
            | BackoffPolicy::Exponential { max_attempts, .. } => *max_attempts,
        }
    }
}

fn within(attempt: u32, max_attempts: Option<u32>) -> bool {
    max_attempts.is_none_or(|max| attempt < max)
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

/// Immutable snapshot of per-connection settings.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// Cadence of heartbeat pings and liveness checks.
    pub heartbeat_interval: Duration,
    /// Consecutive silent intervals before the link is declared dead.
    pub heartbeat_miss_threshold: u32,
    /// Largest body accepted on decode and on send.
    pub max_frame_body_length: usize,
    /// Width of the length header in bytes (1..=8).
    pub header_length: usize,
    /// Whether failures enter `Reconnecting` instead of `Disconnected`.
    pub reconnect_enabled: bool,
    /// Delays between reconnect attempts.
    pub reconnect_backoff: BackoffPolicy,
    /// Socket write timeout for the send loop.
    pub write_timeout: Option<Duration>,
    /// Deadline for correlated responses. `None` waits until teardown.
    pub request_timeout: Option<Duration>,
    /// Correlation id extraction for request/response sends.
    pub correlation: Option<Arc<dyn CorrelationExtractor>>,
    /// Log every inbound and outbound frame at debug level.
    pub debug: bool,
}

impl ConnectionOptions {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(ConnError::InvalidOptions(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConnError::InvalidOptions(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_miss_threshold == 0 {
            return Err(ConnError::InvalidOptions(
                "heartbeat_miss_threshold must be at least 1".to_string(),
            ));
        }
        if matches!(self.request_timeout, Some(t) if t.is_zero()) {
            return Err(ConnError::InvalidOptions(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        self.codec()
            .map(|_| ())
            .map_err(|err| ConnError::InvalidOptions(err.to_string()))
    }

    /// Frame codec for these options.
    pub fn codec(&self) -> relink_frame::Result<FrameCodec> {
        FrameCodec::new(self.header_length, self.max_frame_body_length)
    }

    /// Framed reader/writer configuration for these options.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            header_length: self.header_length,
            max_body_length: self.max_frame_body_length,
            read_timeout: None,
            write_timeout: self.write_timeout,
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_threshold: 3,
            max_frame_body_length: DEFAULT_MAX_BODY_LENGTH,
            header_length: DEFAULT_HEADER_LENGTH,
            reconnect_enabled: true,
            reconnect_backoff: BackoffPolicy::default(),
            write_timeout: None,
            request_timeout: Some(Duration::from_secs(10)),
            correlation: None,
            debug: false,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_miss_threshold", &self.heartbeat_miss_threshold)
            .field("max_frame_body_length", &self.max_frame_body_length)
            .field("header_length", &self.header_length)
            .field("reconnect_enabled", &self.reconnect_enabled)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .field("write_timeout", &self.write_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("correlation", &self.correlation.as_ref().map(|_| "<extractor>"))
            .field("debug", &self.debug)
            .finish()
    }
}
