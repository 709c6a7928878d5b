use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use relink_conn::{Endpoint, LinkFailure, RemoteAddress};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Something worth printing about a watched connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Attached {
        endpoint: Endpoint,
    },
    ConnectFailed {
        endpoint: Endpoint,
        error: String,
        will_retry: bool,
    },
    Detached {
        cause: LinkFailure,
        will_reconnect: bool,
    },
}

#[derive(Serialize)]
struct FrameOutput {
    event: &'static str,
    address: String,
    size: usize,
    body: String,
    timestamp: String,
}

#[derive(Serialize)]
struct EventOutput {
    event: &'static str,
    address: String,
    endpoint: Option<String>,
    detail: Option<String>,
    retrying: Option<bool>,
    timestamp: String,
}

pub fn print_frame(body: &[u8], address: &RemoteAddress, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                event: "frame",
                address: address.to_string(),
                size: body.len(),
                body: body_preview(body),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "SIZE", "BODY"])
                .add_row(vec![
                    address.to_string(),
                    body.len().to_string(),
                    body_preview(body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "frame address={} size={} body={}",
                address,
                body.len(),
                body_preview(body)
            );
        }
        OutputFormat::Raw => print_raw(body),
    }
}

pub fn print_event(event: &WatchEvent, address: &RemoteAddress, format: OutputFormat) {
    let (name, endpoint, detail, retrying) = match event {
        WatchEvent::Attached { endpoint } => ("attached", Some(endpoint.to_string()), None, None),
        WatchEvent::ConnectFailed {
            endpoint,
            error,
            will_retry,
        } => (
            "connect_failed",
            Some(endpoint.to_string()),
            Some(error.clone()),
            Some(*will_retry),
        ),
        WatchEvent::Detached {
            cause,
            will_reconnect,
        } => (
            "detached",
            None,
            Some(cause.kind().to_string()),
            Some(*will_reconnect),
        ),
    };

    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event: name,
                address: address.to_string(),
                endpoint,
                detail,
                retrying,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "ADDRESS", "ENDPOINT", "DETAIL", "RETRY"])
                .add_row(vec![
                    name.to_string(),
                    address.to_string(),
                    endpoint.unwrap_or_default(),
                    detail.unwrap_or_default(),
                    retrying.map(|r| r.to_string()).unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("{name} address={address}");
            if let Some(endpoint) = endpoint {
                line.push_str(&format!(" endpoint={endpoint}"));
            }
            if let Some(detail) = detail {
                line.push_str(&format!(" detail={detail}"));
            }
            if let Some(retrying) = retrying {
                line.push_str(&format!(" retry={retrying}"));
            }
            println!("{line}");
        }
        // Raw output carries frame bodies only.
        OutputFormat::Raw => {}
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
