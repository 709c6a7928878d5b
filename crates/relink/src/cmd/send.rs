use std::fs;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use relink_conn::{ConnectionManager, Delivery};

use crate::cmd::{parse_duration, Forwarder, Notice, SendArgs};
use crate::exit::{conn_error, io_error, link_failure, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_frame, OutputFormat, WatchEvent};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;
    let options = relink_conn::ConnectionOptions {
        reconnect_enabled: false,
        ..args.connect.options()?
    };

    let manager = ConnectionManager::new(args.connect.remote_address(), options)
        .map_err(|err| conn_error("invalid options", err))?;
    let (tx, notices) = mpsc::channel();
    manager.subscribe(Arc::new(Forwarder::new(tx)));
    manager
        .connect()
        .map_err(|err| conn_error("connect failed", err))?;

    let result = send_and_wait(&manager, payload, args.wait, wait_timeout, &notices);
    manager.disconnect(false);

    if let Some(body) = result? {
        print_frame(&body, manager.address(), format);
    }
    Ok(SUCCESS)
}

fn send_and_wait(
    manager: &ConnectionManager,
    payload: Bytes,
    wait: bool,
    wait_timeout: Duration,
    notices: &Receiver<Notice>,
) -> CliResult<Option<Bytes>> {
    let (written_tx, written) = mpsc::channel();
    manager
        .send_with_callback(payload, move |result| {
            let _ = written_tx.send(result);
        })
        .map_err(|err| conn_error("send failed", err))?;

    let deadline = Instant::now() + wait_timeout;
    match written.recv_timeout(wait_timeout) {
        Ok(Ok(Delivery::Written | Delivery::Reply(_))) => {}
        Ok(Err(err)) => return Err(conn_error("send failed", err)),
        Err(_) => return Err(CliError::new(TIMEOUT, "send failed: write did not complete")),
    }

    if !wait {
        return Ok(None);
    }
    wait_for_reply(notices, deadline).map(Some)
}

/// First inbound frame before `deadline`, skipping lifecycle events until
/// the link drops.
fn wait_for_reply(notices: &Receiver<Notice>, deadline: Instant) -> CliResult<Bytes> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match notices.recv_timeout(remaining) {
            Ok(Notice::Frame(body)) => return Ok(body),
            Ok(Notice::Event(WatchEvent::Detached { cause, .. })) => {
                return Err(link_failure("receive failed", &cause));
            }
            Ok(Notice::Event(_)) => continue,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CliError::new(TIMEOUT, "receive failed: no reply before timeout"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(CliError::new(
                    crate::exit::INTERNAL,
                    "receive failed: listener dropped",
                ));
            }
        }
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Bytes::copy_from_slice(json.as_bytes()));
    }
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Bytes::from)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Bytes::new())
}
