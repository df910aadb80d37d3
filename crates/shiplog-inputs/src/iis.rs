//! `iis` input: W3C extended log format.
//!
//! ```text
//! #Software: Microsoft Internet Information Services 10.0
//! #Fields: date time s-ip cs-method cs-uri-stem sc-status time-taken
//! 2024-01-15 10:00:00 10.0.0.1 GET /index.html 200 15
//! ```
//!
//! The most recent `#Fields:` directive names the columns of the lines that
//! follow it. Other directives are skipped. `-` marks an empty column and is
//! omitted. Integer columns are stored as numbers. `date` and `time` are UTC
//! and together become the record timestamp.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use shiplog_core::LogRecord;

use crate::file::LineParser;

#[derive(Debug, Default, Clone)]
pub struct W3cLines {
    fields: Vec<String>,
}

impl W3cLines {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl LineParser for W3cLines {
    fn parse(&mut self, line: &str, mut record: LogRecord) -> Option<LogRecord> {
        if let Some(directive) = line.strip_prefix('#') {
            if let Some(names) = directive.strip_prefix("Fields:") {
                self.fields = names.split_whitespace().map(str::to_string).collect();
            }
            return None;
        }

        record.message = Some(line.to_string());
        let mut date = None;
        let mut time = None;
        for (name, value) in self.fields.iter().zip(line.split_whitespace()) {
            if value == "-" {
                continue;
            }
            match name.as_str() {
                "date" => date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok(),
                "time" => time = NaiveTime::parse_from_str(value, "%H:%M:%S").ok(),
                _ => {}
            }
            let value = value
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            record.insert_field(name.clone(), value);
        }
        if let (Some(date), Some(time)) = (date, time) {
            record.timestamp = NaiveDateTime::new(date, time).and_utc();
        }
        Some(record)
    }
}
