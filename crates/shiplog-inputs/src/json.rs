//! `json` input: one JSON object per line.
//!
//! Top-level keys become record fields. A string `message` key fills the
//! record message and an RFC 3339 `@timestamp` replaces the ingest time.
//! Lines that are not JSON objects are kept verbatim as `message` and tagged
//! `_jsonparsefailure`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use shiplog_core::LogRecord;

use crate::file::LineParser;

pub const PARSE_FAILURE_TAG: &str = "_jsonparsefailure";

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLines;

impl LineParser for JsonLines {
    fn parse(&mut self, line: &str, mut record: LogRecord) -> Option<LogRecord> {
        apply_json(&mut record, line);
        Some(record)
    }
}

/// Merge `line` into `record` as a JSON object. Returns false (and keeps the
/// raw line as the message) when it is not one.
pub fn apply_json(record: &mut LogRecord, line: &str) -> bool {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => {
            for (key, value) in map {
                if key == "@timestamp" {
                    if let Some(ts) = value.as_str().and_then(parse_timestamp) {
                        record.timestamp = ts;
                        continue;
                    }
                }
                record.insert_field(key, value);
            }
            true
        }
        _ => {
            record.message = Some(line.to_string());
            record.add_tag(PARSE_FAILURE_TAG);
            false
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
