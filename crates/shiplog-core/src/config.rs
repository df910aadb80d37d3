//! Configuration types for shiplog.
//!
//! [`Configuration::load`] accepts either a single document or a directory.
//! For a directory every `.json`, `.toml`, `.yaml` and `.yml` file is loaded
//! in file-name order and their sections are concatenated, so the pipeline
//! sees one merged [`Configuration`] regardless of where it came from.
//!
//! Every section is optional; an absent section is an empty collection.
//!
//! ```toml
//! [[stdout]]
//! codec = "json"
//!
//! [[tcp]]
//! port = 5140
//! type = "syslog"
//! ```

use std::path::{Path, PathBuf};

use config::FileFormat;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::types::{InputKind, OutputKind};

// ---------------------------------------------------------------------------
// Top-level document
// ---------------------------------------------------------------------------

/// A loaded, immutable configuration: ordered output and input declarations.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub elasticsearch: Vec<ElasticsearchOutput>,
    #[serde(default)]
    pub redis: Vec<RedisOutput>,
    #[serde(default)]
    pub stdout: Vec<StdoutOutput>,
    #[serde(default)]
    pub json: Vec<FileInput>,
    #[serde(default)]
    pub iis: Vec<FileInput>,
    #[serde(default)]
    pub os_event: Vec<OsEventInput>,
    #[serde(default)]
    pub log: Vec<FileInput>,
    #[serde(default)]
    pub tcp: Vec<TcpInput>,
    #[serde(default)]
    pub stdin: Vec<StdinInput>,
}

// ---------------------------------------------------------------------------
// Output declarations
// ---------------------------------------------------------------------------

/// `[[elasticsearch]]`: bulk indexing over HTTP.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElasticsearchOutput {
    #[serde(default = "default_hosts")]
    pub host: Vec<String>,
    #[serde(default = "default_elasticsearch_port")]
    pub port: u16,
    /// Index name; `%{+FORMAT}` is expanded from the record timestamp.
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_elasticsearch_batch")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// `[[redis]]`: `RPUSH` onto a list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedisOutput {
    #[serde(default = "default_hosts")]
    pub host: Vec<String>,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default = "default_redis_key")]
    pub key: String,
    #[serde(default = "default_redis_batch")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// `[[stdout]]`: local sink on standard output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StdoutOutput {
    #[serde(default)]
    pub codec: StdoutCodec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdoutCodec {
    #[default]
    Json,
    Line,
}

fn default_hosts() -> Vec<String> { vec!["localhost".to_string()] }
fn default_elasticsearch_port() -> u16 { 9200 }
fn default_index() -> String { "logstash-%{+YYYY.MM.dd}".to_string() }
fn default_protocol() -> String { "http".to_string() }
fn default_elasticsearch_batch() -> usize { 500 }
fn default_redis_port() -> u16 { 6379 }
fn default_redis_key() -> String { "logstash".to_string() }
fn default_redis_batch() -> usize { 100 }
fn default_flush_interval_ms() -> u64 { 1_000 }
fn default_timeout_ms() -> u64 { 10_000 }

impl Default for ElasticsearchOutput {
    fn default() -> Self {
        Self {
            host: default_hosts(),
            port: default_elasticsearch_port(),
            index: default_index(),
            protocol: default_protocol(),
            batch_size: default_elasticsearch_batch(),
            flush_interval_ms: default_flush_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for RedisOutput {
    fn default() -> Self {
        Self {
            host: default_hosts(),
            port: default_redis_port(),
            key: default_redis_key(),
            batch_size: default_redis_batch(),
            flush_interval_ms: default_flush_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for StdoutOutput {
    fn default() -> Self {
        Self { codec: StdoutCodec::Json }
    }
}

// ---------------------------------------------------------------------------
// Input declarations
// ---------------------------------------------------------------------------

/// `[[json]]`, `[[iis]]` and `[[log]]`: a followed file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FileInput {
    pub location: PathBuf,
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Read existing content first instead of starting at the current end.
    #[serde(default)]
    pub start_from_beginning: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// `[[os_event]]`: the host's system event log.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OsEventInput {
    /// Event log channel; informational on journald hosts.
    #[serde(default)]
    pub channel: Option<String>,
    /// Restrict to these systemd units; empty follows every unit.
    #[serde(default)]
    pub units: Vec<String>,
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `[[tcp]]`: newline-framed listener.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TcpInput {
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `[[stdin]]`: newline-framed standard input.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StdinInput {
    #[serde(default, rename = "type")]
    pub type_tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_poll_interval_ms() -> u64 { 500 }
fn default_tcp_port() -> u16 { 5140 }
fn default_bind() -> String { "0.0.0.0".to_string() }

impl FileInput {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            type_tag: None,
            tags: Vec::new(),
            start_from_beginning: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for TcpInput {
    fn default() -> Self {
        Self {
            port: default_tcp_port(),
            bind: default_bind(),
            type_tag: None,
            tags: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed declarations
// ---------------------------------------------------------------------------

/// One output declaration, tagged with its section.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputDeclaration {
    Elasticsearch(ElasticsearchOutput),
    Redis(RedisOutput),
    Stdout(StdoutOutput),
}

impl OutputDeclaration {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputDeclaration::Elasticsearch(_) => OutputKind::Elasticsearch,
            OutputDeclaration::Redis(_) => OutputKind::Redis,
            OutputDeclaration::Stdout(_) => OutputKind::Stdout,
        }
    }
}

/// One input declaration, tagged with its section.
#[derive(Debug, Clone, PartialEq)]
pub enum InputDeclaration {
    Json(FileInput),
    Iis(FileInput),
    OsEvent(OsEventInput),
    Log(FileInput),
    Tcp(TcpInput),
    Stdin(StdinInput),
}

impl InputDeclaration {
    pub fn kind(&self) -> InputKind {
        match self {
            InputDeclaration::Json(_) => InputKind::Json,
            InputDeclaration::Iis(_) => InputKind::Iis,
            InputDeclaration::OsEvent(_) => InputKind::OsEvent,
            InputDeclaration::Log(_) => InputKind::Log,
            InputDeclaration::Tcp(_) => InputKind::Tcp,
            InputDeclaration::Stdin(_) => InputKind::Stdin,
        }
    }

    /// Record `type` tag: the declared one, or the section name.
    pub fn type_tag(&self) -> String {
        let declared = match self {
            InputDeclaration::Json(d) | InputDeclaration::Iis(d) | InputDeclaration::Log(d) => {
                d.type_tag.as_ref()
            }
            InputDeclaration::OsEvent(d) => d.type_tag.as_ref(),
            InputDeclaration::Tcp(d) => d.type_tag.as_ref(),
            InputDeclaration::Stdin(d) => d.type_tag.as_ref(),
        };
        declared
            .cloned()
            .unwrap_or_else(|| self.kind().section().to_string())
    }

    pub fn tags(&self) -> &[String] {
        match self {
            InputDeclaration::Json(d) | InputDeclaration::Iis(d) | InputDeclaration::Log(d) => {
                &d.tags
            }
            InputDeclaration::OsEvent(d) => &d.tags,
            InputDeclaration::Tcp(d) => &d.tags,
            InputDeclaration::Stdin(d) => &d.tags,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

const ELIGIBLE_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml"];

impl Configuration {
    /// Resolve `path` as a single document or a directory of documents.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        if path.is_dir() {
            Self::load_dir(path)
        } else if path.is_file() {
            Self::load_file(path)
        } else {
            Err(PipelineError::ConfigurationNotFound {
                path: path.to_path_buf(),
            })
        }
    }

    /// Parse an in-memory document.
    pub fn from_str(src: &str, format: FileFormat) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(src, format))
            .build()?
            .try_deserialize()
    }

    fn load_file(path: &Path) -> Result<Self, PipelineError> {
        let format = format_for(path).unwrap_or(FileFormat::Json);
        config::Config::builder()
            .add_source(config::File::from(path).format(format).required(true))
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Configuration>())
            .map_err(|source| PipelineError::ConfigurationInvalid {
                path: path.to_path_buf(),
                source,
            })
    }

    fn load_dir(dir: &Path) -> Result<Self, PipelineError> {
        let entries = std::fs::read_dir(dir).map_err(|_| PipelineError::ConfigurationNotFound {
            path: dir.to_path_buf(),
        })?;

        let mut documents: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && format_for(path).is_some())
            .collect();
        documents.sort();

        let mut merged = Configuration::default();
        for document in &documents {
            merged.merge(Self::load_file(document)?);
        }
        Ok(merged)
    }

    /// Append every declaration of `other` after this document's own.
    pub fn merge(&mut self, other: Configuration) {
        self.elasticsearch.extend(other.elasticsearch);
        self.redis.extend(other.redis);
        self.stdout.extend(other.stdout);
        self.json.extend(other.json);
        self.iis.extend(other.iis);
        self.os_event.extend(other.os_event);
        self.log.extend(other.log);
        self.tcp.extend(other.tcp);
        self.stdin.extend(other.stdin);
    }

    /// Output declarations in construction order.
    pub fn outputs(&self) -> Vec<OutputDeclaration> {
        let elasticsearch = self.elasticsearch.iter().cloned().map(OutputDeclaration::Elasticsearch);
        let redis = self.redis.iter().cloned().map(OutputDeclaration::Redis);
        let stdout = self.stdout.iter().cloned().map(OutputDeclaration::Stdout);
        elasticsearch.chain(redis).chain(stdout).collect()
    }

    /// Input declarations in construction order.
    pub fn inputs(&self) -> Vec<InputDeclaration> {
        let json = self.json.iter().cloned().map(InputDeclaration::Json);
        let iis = self.iis.iter().cloned().map(InputDeclaration::Iis);
        let os_event = self.os_event.iter().cloned().map(InputDeclaration::OsEvent);
        let log = self.log.iter().cloned().map(InputDeclaration::Log);
        let tcp = self.tcp.iter().cloned().map(InputDeclaration::Tcp);
        let stdin = self.stdin.iter().cloned().map(InputDeclaration::Stdin);
        json.chain(iis)
            .chain(os_event)
            .chain(log)
            .chain(tcp)
            .chain(stdin)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs().is_empty() && self.inputs().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn format_for(path: &Path) -> Option<FileFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !ELIGIBLE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(match ext.as_str() {
        "toml" => FileFormat::Toml,
        "yaml" | "yml" => FileFormat::Yaml,
        _ => FileFormat::Json,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
