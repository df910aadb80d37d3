//! Core types shared by every shiplog crate.
//!
//! This module defines the unit of data flowing through the pipeline, the
//! [`LogRecord`], together with the [`Severity`] scale used by the agent's own
//! diagnostics and the [`InputKind`] / [`OutputKind`] discriminants that name
//! configuration sections.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::level_filters::LevelFilter;

/// A single log event as produced by a source and consumed by every sink.
///
/// Serialises to the logstash event shape: `@timestamp`, `@version`, `type`,
/// `host`, `message`, `tags`, then every structured field at the top level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Event time. Ingest time unless the source parsed one from the line.
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "@version")]
    pub version: &'static str,
    /// Declaration `type` tag; defaults to the input section name.
    #[serde(rename = "type")]
    pub type_tag: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Structured fields extracted by the source. Reserved keys (`@timestamp`,
    /// `@version`, `type`, `host`, `message`, `tags`) never appear here.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Input kind that produced the record. Not serialised.
    #[serde(skip)]
    pub input: InputKind,
}

const RESERVED_KEYS: &[&str] = &["@timestamp", "@version", "type", "host", "message", "tags"];

impl LogRecord {
    pub fn new(input: InputKind, type_tag: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            version: "1",
            type_tag: type_tag.into(),
            host: hostname().to_string(),
            message: None,
            tags: Vec::new(),
            fields: Map::new(),
            input,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        for tag in tags {
            self.add_tag(tag);
        }
        self
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Insert a structured field. A `message` key fills [`LogRecord::message`]
    /// when it is a string; other reserved keys are stored with a leading `_`.
    pub fn insert_field(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == "message" {
            if let Value::String(message) = value {
                self.message = Some(message);
                return;
            }
        }
        if RESERVED_KEYS.contains(&key.as_str()) {
            self.fields.insert(format!("_{key}"), value);
        } else {
            self.fields.insert(key, value);
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert_field(key, value.into());
        self
    }

    /// Encode as a single JSON line (no trailing newline).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Local host name, resolved once per process.
pub fn hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        std::env::var("HOSTNAME")
            .ok()
            .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Diagnostic severity, ordered from most to least verbose. `Off` disables
/// every event when used as a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Off,
}

impl Severity {
    /// The `tracing` filter admitting this severity and everything above it.
    /// `tracing` has no fatal level, so `Fatal` gates like `Error`.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            Severity::Trace => LevelFilter::TRACE,
            Severity::Debug => LevelFilter::DEBUG,
            Severity::Info => LevelFilter::INFO,
            Severity::Warn => LevelFilter::WARN,
            Severity::Error | Severity::Fatal => LevelFilter::ERROR,
            Severity::Off => LevelFilter::OFF,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Trace => write!(f, "TRACE"),
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
            Severity::Off => write!(f, "OFF"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity level {0:?}")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "debug" => Ok(Severity::Debug),
            "info" | "information" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" | "critical" => Ok(Severity::Fatal),
            "off" | "none" => Ok(Severity::Off),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Component kinds
// ---------------------------------------------------------------------------

/// Input declaration sections, in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InputKind {
    Json,
    Iis,
    OsEvent,
    #[default]
    Log,
    Tcp,
    Stdin,
}

impl InputKind {
    pub const ALL: [InputKind; 6] = [
        InputKind::Json,
        InputKind::Iis,
        InputKind::OsEvent,
        InputKind::Log,
        InputKind::Tcp,
        InputKind::Stdin,
    ];

    /// Configuration section name, also the default record `type` tag.
    pub fn section(self) -> &'static str {
        match self {
            InputKind::Json => "json",
            InputKind::Iis => "iis",
            InputKind::OsEvent => "os_event",
            InputKind::Log => "log",
            InputKind::Tcp => "tcp",
            InputKind::Stdin => "stdin",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Output declaration sections, in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Elasticsearch,
    Redis,
    Stdout,
}

impl OutputKind {
    pub const ALL: [OutputKind; 3] = [OutputKind::Elasticsearch, OutputKind::Redis, OutputKind::Stdout];

    pub fn section(self) -> &'static str {
        match self {
            OutputKind::Elasticsearch => "elasticsearch",
            OutputKind::Redis => "redis",
            OutputKind::Stdout => "stdout",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
