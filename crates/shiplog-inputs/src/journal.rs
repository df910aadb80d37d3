//! `os_event` input: the host's system event log.
//!
//! On Linux this follows the systemd journal through
//! `journalctl --follow --output=json --lines=0`, one JSON entry per line.
//! Other hosts have no supported event log; the source logs a warning and
//! idles until stopped.

use std::process::Stdio;

use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use shiplog_core::config::OsEventInput;
use shiplog_core::{ComponentId, InputDeclaration, LogRecord, SourceContext, SourceError};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lines::LineReader;
use crate::runner::{spawn_source, Emitter, SourceHandle};

/// Journal fields copied onto the record under their lower-cased names.
const KEPT_FIELDS: &[&str] = &[
    "PRIORITY",
    "SYSLOG_IDENTIFIER",
    "SYSLOG_FACILITY",
    "_SYSTEMD_UNIT",
    "_PID",
    "_UID",
    "_COMM",
    "_EXE",
    "_HOSTNAME",
];

pub fn spawn(
    id: ComponentId,
    decl: &InputDeclaration,
    input: &OsEventInput,
    ctx: &SourceContext,
) -> SourceHandle {
    let args = journalctl_args(input);
    let channel = input.channel.clone();
    spawn_source(id, decl, ctx, move |emitter, stop| async move {
        if let Some(channel) = channel {
            debug!(%channel, "event log channel is informational on this host");
        }
        if cfg!(target_os = "linux") {
            follow_journal(args, emitter, stop).await
        } else {
            warn!("no supported system event log on this host; os_event input is idle");
            stop.cancelled().await;
            Ok(())
        }
    })
}

pub fn journalctl_args(input: &OsEventInput) -> Vec<String> {
    let mut args = vec![
        "--follow".to_string(),
        "--output=json".to_string(),
        "--lines=0".to_string(),
    ];
    for unit in &input.units {
        args.push("--unit".to_string());
        args.push(unit.clone());
    }
    args
}

async fn follow_journal(
    args: Vec<String>,
    emitter: Emitter,
    stop: CancellationToken,
) -> Result<(), SourceError> {
    let mut child = Command::new("journalctl")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SourceError::Watch("journalctl stdout unavailable".to_string()))?;
    let mut lines = LineReader::new(stdout);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(record) = journal_record(&line, emitter.record()) {
                        emitter.emit(record).await;
                    }
                }
                None => {
                    warn!(source = %emitter.id(), "journalctl exited");
                    break;
                }
            },
        }
    }
    end_child(&mut child, emitter.id());
    Ok(())
}

/// Signal `child` to exit. Returns false, and logs why, when it could not be
/// signalled, typically because it already exited.
fn end_child(child: &mut Child, source: &ComponentId) -> bool {
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            debug!(%source, error = %e, "journalctl not signalled");
            false
        }
    }
}

/// Map one `journalctl --output=json` line onto `record`. Lines that are not
/// JSON objects are skipped.
pub fn journal_record(line: &str, mut record: LogRecord) -> Option<LogRecord> {
    let Value::Object(entry) = serde_json::from_str::<Value>(line).ok()? else {
        return None;
    };

    record.message = Some(message_text(&entry));
    if let Some(ts) = entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(Value::as_str)
        .and_then(|micros| micros.parse::<i64>().ok())
        .and_then(|micros| Utc.timestamp_micros(micros).single())
    {
        record.timestamp = ts;
    }
    for key in KEPT_FIELDS {
        if let Some(value) = entry.get(*key) {
            let name = key.trim_start_matches('_').to_ascii_lowercase();
            record.insert_field(name, value.clone());
        }
    }
    Some(record)
}

// Binary messages come through as byte arrays.
fn message_text(entry: &Map<String, Value>) -> String {
    match entry.get("MESSAGE") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(bytes)) => {
            let raw: Vec<u8> = bytes
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|b| u8::try_from(b).ok())
                .collect();
            String::from_utf8_lossy(&raw).into_owned()
        }
        _ => String::new(),
    }
}
