use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relink_conn::{
    BackoffPolicy, ConnectionManager, ConnectionOptions, HeartbeatListener, LinkFailure,
};
use tracing::info;

use crate::cmd::{parse_duration, Forwarder, Notice, WatchArgs};
use crate::exit::{conn_error, link_failure, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_event, print_frame, OutputFormat, WatchEvent};

const POLL: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Matches one fixed reply body.
struct FixedReply(Bytes);

impl HeartbeatListener for FixedReply {
    fn is_heartbeat_reply(&self, body: &[u8]) -> bool {
        body == self.0.as_ref()
    }
}

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let options = watch_options(&args)?;
    let manager = ConnectionManager::new(args.connect.remote_address(), options)
        .map_err(|err| conn_error("invalid options", err))?;

    let (tx, notices) = mpsc::channel();
    manager.subscribe(Arc::new(Forwarder::new(tx)));

    if let Some(payload) = &args.heartbeat {
        let listener = args.heartbeat_reply.as_ref().map(|reply| {
            Arc::new(FixedReply(Bytes::copy_from_slice(reply.as_bytes())))
                as Arc<dyn HeartbeatListener>
        });
        manager
            .start_heartbeat(Bytes::copy_from_slice(payload.as_bytes()), listener)
            .map_err(|err| conn_error("heartbeat setup failed", err))?;
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    manager
        .connect()
        .map_err(|err| conn_error("connect failed", err))?;

    let mut printed = 0usize;
    let outcome = loop {
        if !running.load(Ordering::SeqCst) {
            info!("interrupted");
            break Ok(SUCCESS);
        }
        let notice = match notices.recv_timeout(POLL) {
            Ok(notice) => notice,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                break Err(CliError::new(INTERNAL, "watch failed: listener dropped"));
            }
        };
        match notice {
            Notice::Frame(body) => {
                print_frame(&body, manager.address(), format);
                printed = printed.saturating_add(1);
                if args.count.is_some_and(|count| printed >= count) {
                    break Ok(SUCCESS);
                }
            }
            Notice::Event(event) => {
                print_event(&event, manager.address(), format);
                if let Some(failure) = terminal_failure(&event) {
                    break Err(link_failure("connection lost", failure));
                }
            }
        }
    };

    manager.disconnect(false);
    outcome
}

fn watch_options(args: &WatchArgs) -> CliResult<ConnectionOptions> {
    let initial = parse_duration(&args.retry_delay)?;
    Ok(ConnectionOptions {
        heartbeat_interval: parse_duration(&args.heartbeat_interval)?,
        heartbeat_miss_threshold: args.heartbeat_misses,
        reconnect_enabled: true,
        reconnect_backoff: BackoffPolicy::Exponential {
            initial,
            max: MAX_RETRY_DELAY.max(initial),
            max_attempts: args.max_attempts,
        },
        ..args.connect.options()?
    })
}

/// A detach the manager will not recover from on its own.
fn terminal_failure(event: &WatchEvent) -> Option<&LinkFailure> {
    match event {
        WatchEvent::Detached {
            cause,
            will_reconnect: false,
        } => Some(cause),
        _ => None,
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
