mod common;

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use common::{Event, EventLog, ServerReader};
use relink_conn::{
    BackoffPolicy, ConnError, ConnectionManager, ConnectionOptions, ConnectionState, Endpoint,
    LinkFailure, RemoteAddress,
};

fn fast_options(max_attempts: Option<u32>) -> ConnectionOptions {
    ConnectionOptions {
        connect_timeout: Duration::from_millis(500),
        reconnect_backoff: BackoffPolicy::Fixed {
            delay: Duration::from_millis(20),
            max_attempts,
        },
        ..ConnectionOptions::default()
    }
}

#[test]
fn sends_arrive_in_enqueue_order() {
    let (listener, port) = common::listener();
    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    manager.connect().expect("connect should succeed");
    let mut server = common::accept(&listener);

    for i in 0..200 {
        manager
            .send(format!("payload-{i}"))
            .expect("send should queue");
    }

    let mut reader = ServerReader::new();
    for i in 0..200 {
        let body = reader.next(&mut server).expect("frame should arrive");
        assert_eq!(body.as_ref(), format!("payload-{i}").as_bytes());
    }

    manager.disconnect(false);
}

#[test]
fn split_hello_is_dispatched_once() {
    let (listener, port) = common::listener();
    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    let mut server = common::accept(&listener);

    let mut wire = BytesMut::new();
    wire.put_u32(5);
    wire.put_slice(b"hello");
    server.write_all(&wire[..6]).unwrap();
    server.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    server.write_all(&wire[6..]).unwrap();

    log.wait_for("hello frame", |events| {
        events.iter().any(|e| matches!(e, Event::Frame(_)))
    });
    thread::sleep(Duration::from_millis(50));

    let frames: Vec<_> = log
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            Event::Frame(body) => Some(body),
            _ => None,
        })
        .collect();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].as_ref(), b"hello");

    manager.disconnect(false);
}

#[test]
fn attach_precedes_first_frame() {
    let (listener, port) = common::listener();
    let server = thread::spawn(move || {
        let mut stream = common::accept(&listener);
        common::write_frame(&mut stream, b"greeting");
        stream
    });

    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    let _stream = server.join().unwrap();

    let events = log.wait_for("greeting", |events| events.len() >= 2);
    assert!(matches!(events[0], Event::Attached(_)));
    assert!(matches!(&events[1], Event::Frame(body) if body.as_ref() == b"greeting"));

    manager.disconnect(false);
}

#[test]
fn connect_failure_leaves_idle_without_retry() {
    let port = common::closed_port();
    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());

    assert!(manager.connect().is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(
        log.snapshot(),
        vec![Event::ConnectFailed {
            endpoint: Endpoint::new("127.0.0.1", port),
            will_retry: false,
        }]
    );
}

#[cfg(target_os = "linux")]
#[test]
fn unanswered_connect_times_out_and_stays_idle() {
    let (_listener, port, _held) = common::saturated_listener();
    let options = ConnectionOptions {
        connect_timeout: Duration::from_millis(300),
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());

    let started = Instant::now();
    let err = manager.connect().expect_err("connect should time out");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(
        matches!(err, ConnError::ConnectTimeout { ref endpoint, timeout }
            if endpoint.port == port && timeout == Duration::from_millis(300)),
        "unexpected error: {err:?}"
    );
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(
        log.snapshot(),
        vec![Event::ConnectFailed {
            endpoint: Endpoint::new("127.0.0.1", port),
            will_retry: false,
        }]
    );
}

#[cfg(target_os = "linux")]
#[test]
fn disconnect_during_connect_cancels_the_attempt() {
    let (listener, port, held) = common::saturated_listener();
    let options = ConnectionOptions {
        connect_timeout: Duration::from_secs(4),
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());

    let connecting = {
        let manager = manager.clone();
        thread::spawn(move || manager.connect())
    };
    common::wait_for_state(&manager, ConnectionState::Connecting);
    thread::sleep(Duration::from_millis(50));

    manager.disconnect(false);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Free one queue slot so the retransmitted SYN completes the handshake
    // after the disconnect.
    let _first = common::accept(&listener);
    let result = connecting.join().expect("connect thread should not panic");
    assert!(
        matches!(result, Err(ConnError::Cancelled) | Err(ConnError::ConnectTimeout { .. })),
        "unexpected result: {result:?}"
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(log.count(|e| matches!(e, Event::Attached(_))), 0);
    assert!(manager.active_endpoint().is_none());

    if matches!(result, Err(ConnError::Cancelled)) {
        // The abandoned socket is queued behind the held ones and already closed.
        listener.set_nonblocking(true).expect("nonblocking listener");
        let mut accepted = Vec::new();
        while let Ok((stream, _)) = listener.accept() {
            accepted.push(stream);
        }
        let mut abandoned = accepted.pop().expect("abandoned attempt was queued");
        abandoned.set_nonblocking(false).expect("blocking stream");
        abandoned
            .set_read_timeout(Some(common::WAIT))
            .expect("read timeout");
        let mut buf = [0u8; 16];
        assert_eq!(abandoned.read(&mut buf).expect("read should see EOF"), 0);
    }
    drop(held);
}

#[test]
fn lost_link_reconnects_to_same_server() {
    let (listener, port) = common::listener();
    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");

    let first = common::accept(&listener);
    drop(first);

    let mut second = common::accept(&listener);
    common::wait_for_state(&manager, ConnectionState::Connected);
    manager.send("after-reconnect").expect("send should queue");
    let body = ServerReader::new()
        .next(&mut second)
        .expect("frame should arrive");
    assert_eq!(body.as_ref(), b"after-reconnect");

    let events = log.wait_for("second attach", |events| events.len() >= 3);
    assert!(matches!(events[0], Event::Attached(_)));
    assert_eq!(
        events[1],
        Event::Detached {
            cause: LinkFailure::RemoteClosed,
            will_reconnect: true,
        }
    );
    assert!(matches!(events[2], Event::Attached(_)));

    manager.disconnect(false);
}

#[test]
fn failover_to_backup_attaches() {
    let (primary, primary_port) = common::listener();
    let (backup, backup_port) = common::listener();
    let address =
        RemoteAddress::new("127.0.0.1", primary_port).with_backup("127.0.0.1", backup_port);
    let manager = ConnectionManager::new(address, fast_options(Some(10))).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());

    manager.connect().expect("connect should succeed");
    let link = common::accept(&primary);
    assert_eq!(
        manager.active_endpoint(),
        Some(Endpoint::new("127.0.0.1", primary_port))
    );

    // Primary goes away entirely.
    drop(primary);
    drop(link);

    let _backup_link = common::accept(&backup);
    let events = log.wait_for("attach to backup", |events| {
        events
            .iter()
            .filter(|e| matches!(e, Event::Attached(_)))
            .count()
            == 2
    });
    common::wait_for_state(&manager, ConnectionState::Connected);

    assert_eq!(
        manager.active_endpoint(),
        Some(Endpoint::new("127.0.0.1", backup_port))
    );
    assert_eq!(
        events.first(),
        Some(&Event::Attached(Endpoint::new("127.0.0.1", primary_port)))
    );
    assert!(events.contains(&Event::ConnectFailed {
        endpoint: Endpoint::new("127.0.0.1", primary_port),
        will_retry: true,
    }));
    assert_eq!(
        events.last(),
        Some(&Event::Attached(Endpoint::new("127.0.0.1", backup_port)))
    );

    manager.disconnect(false);
}

#[test]
fn disconnect_during_backoff_ends_disconnected() {
    let (listener, port) = common::listener();
    let options = ConnectionOptions {
        reconnect_backoff: BackoffPolicy::Fixed {
            delay: Duration::from_secs(30),
            max_attempts: None,
        },
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    drop(common::accept(&listener));

    common::wait_for_state(&manager, ConnectionState::Reconnecting);
    manager.disconnect(false);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(log.count(|e| matches!(e, Event::Attached(_))), 1);
    assert!(matches!(
        manager.send("nope"),
        Err(ConnError::NoActiveConnection)
    ));
}

#[test]
fn reconnect_exhaustion_reports_and_stops() {
    let (listener, port) = common::listener();
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(Some(2)))
            .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    let link = common::accept(&listener);
    drop(listener);
    drop(link);

    let events = log.wait_for("exhaustion", |events| {
        events.iter().any(|e| {
            matches!(
                e,
                Event::Detached {
                    cause: LinkFailure::ReconnectExhausted { .. },
                    ..
                }
            )
        })
    });
    assert_eq!(
        events.last(),
        Some(&Event::Detached {
            cause: LinkFailure::ReconnectExhausted { attempts: 2 },
            will_reconnect: false,
        })
    );
    assert_eq!(
        log.count(|e| matches!(e, Event::ConnectFailed { .. })),
        2
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[test]
fn disconnect_with_reconnect_comes_back() {
    let (listener, port) = common::listener();
    let manager = ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), fast_options(None))
        .expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    let _first = common::accept(&listener);

    manager.disconnect(true);
    let _second = common::accept(&listener);
    common::wait_for_state(&manager, ConnectionState::Connected);

    let events = log.wait_for("reattach", |events| events.len() >= 3);
    assert_eq!(
        events[1],
        Event::Detached {
            cause: LinkFailure::Requested,
            will_reconnect: true,
        }
    );
    assert!(matches!(events[2], Event::Attached(_)));

    manager.disconnect(false);
}

#[test]
fn heartbeat_timeout_fires_exactly_once() {
    let (listener, port) = common::listener();
    let options = ConnectionOptions {
        heartbeat_interval: Duration::from_millis(30),
        heartbeat_miss_threshold: 3,
        reconnect_enabled: false,
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager
        .start_heartbeat("ping", None)
        .expect("heartbeat should start");
    manager.connect().expect("connect should succeed");

    // Server reads pings but never answers.
    let mut server = common::accept(&listener);
    let drain = thread::spawn(move || {
        let mut reader = ServerReader::new();
        let mut pings = 0usize;
        while reader.next(&mut server).is_some() {
            pings += 1;
        }
        pings
    });

    log.wait_for("heartbeat timeout", |events| {
        events
            .iter()
            .any(|e| matches!(e, Event::Detached { .. }))
    });
    thread::sleep(Duration::from_millis(200));

    assert_eq!(
        log.count(|e| matches!(
            e,
            Event::Detached {
                cause: LinkFailure::HeartbeatTimeout { .. },
                will_reconnect: false,
            }
        )),
        1
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(drain.join().unwrap() >= 1, "pings reached the server");
}

#[test]
fn inbound_traffic_keeps_heartbeat_alive() {
    let (listener, port) = common::listener();
    let options = ConnectionOptions {
        heartbeat_interval: Duration::from_millis(30),
        heartbeat_miss_threshold: 3,
        reconnect_enabled: false,
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    manager.start_heartbeat("ping", None).unwrap();
    manager.connect().expect("connect should succeed");

    // Echo every ping straight back.
    let mut server = common::accept(&listener);
    let echo = thread::spawn(move || {
        let mut reader = ServerReader::new();
        while let Some(body) = reader.next(&mut server) {
            if !common::try_write_frame(&mut server, &body) {
                break;
            }
        }
    });

    thread::sleep(Duration::from_millis(400));
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.disconnect(false);
    echo.join().unwrap();
}

#[test]
fn oversized_inbound_header_is_protocol_violation() {
    let (listener, port) = common::listener();
    let options = ConnectionOptions {
        max_frame_body_length: 1024,
        reconnect_enabled: false,
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    let log = EventLog::new();
    manager.subscribe(log.clone());
    manager.connect().expect("connect should succeed");
    let mut server = common::accept(&listener);

    // Header only; the body never needs to arrive.
    server.write_all(&[0x00, 0x10, 0x00, 0x00]).unwrap();

    let events = log.wait_for("protocol violation", |events| {
        events.iter().any(|e| matches!(e, Event::Detached { .. }))
    });
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Detached {
            cause: LinkFailure::ProtocolViolation(_),
            will_reconnect: false,
        }
    )));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[test]
fn two_byte_header_on_the_wire() {
    let (listener, port) = common::listener();
    let options = ConnectionOptions {
        header_length: 2,
        max_frame_body_length: 1024,
        ..fast_options(None)
    };
    let manager =
        ConnectionManager::new(RemoteAddress::new("127.0.0.1", port), options).expect("options are valid");
    manager.connect().expect("connect should succeed");
    let mut server = common::accept(&listener);

    manager.send("abc").unwrap();
    let mut wire = [0u8; 5];
    std::io::Read::read_exact(&mut server, &mut wire).unwrap();
    assert_eq!(wire, [0, 3, b'a', b'b', b'c']);

    manager.disconnect(false);
}
