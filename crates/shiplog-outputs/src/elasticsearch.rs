//! `elasticsearch` output: bulk indexing over HTTP.
//!
//! Each batch becomes one `POST /_bulk` request with an NDJSON body:
//!
//! ```text
//! {"index":{"_index":"logstash-2024.01.15"}}
//! {"@timestamp":"2024-01-15T10:00:00Z","@version":"1","type":"log",...}
//! ```
//!
//! Attempts rotate through the configured hosts. Transport errors, timeouts
//! and 5xx/429 replies are retried with exponential backoff; a batch that
//! still fails after [`MAX_ATTEMPTS`] is dropped with a warning. Rejections
//! of individual documents are logged, never retried.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use regex::Regex;
use serde_json::{json, Value};
use shiplog_core::config::ElasticsearchOutput;
use shiplog_core::{ComponentId, LogRecord, PipelineError, SharedRecord, Sink, SinkContext, Source};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::runner::{Backoff, BatchPolicy, BatchWriter, SinkCore};

pub const MAX_ATTEMPTS: u32 = 3;

/// Bulk-indexing sink.
///
/// Only plain `http` endpoints are supported. No TLS stack is linked in, so
/// an `https` protocol is refused by [`ElasticsearchSink::new`] with a
/// construction error rather than silently downgraded; put a TLS-terminating
/// proxy in front of the cluster if one is needed.
pub struct ElasticsearchSink {
    core: SinkCore,
}

impl ElasticsearchSink {
    pub fn new(
        id: ComponentId,
        output: &ElasticsearchOutput,
        ctx: &SinkContext,
    ) -> Result<Self, PipelineError> {
        if output.protocol != "http" {
            return Err(PipelineError::construction(
                id.to_string(),
                format!("unsupported protocol {:?}; only \"http\" is available", output.protocol),
            ));
        }
        if output.host.is_empty() {
            return Err(PipelineError::construction(id.to_string(), SinkError::NoHosts));
        }
        let index = IndexTemplate::parse(&output.index)
            .map_err(|e| PipelineError::construction(id.to_string(), e))?;
        let endpoints = output
            .host
            .iter()
            .map(|host| format!("{}://{}:{}/_bulk", output.protocol, host, output.port))
            .collect();

        let writer = BulkWriter {
            client: Client::builder(TokioExecutor::new()).build_http(),
            endpoints,
            next: 0,
            index,
            timeout: Duration::from_millis(output.timeout_ms),
            backoff: Backoff::default(),
            shutdown: ctx.shutdown.clone(),
        };
        let policy = BatchPolicy {
            max_records: output.batch_size,
            flush_interval: Duration::from_millis(output.flush_interval_ms),
        };
        Ok(Self {
            core: SinkCore::start(id, writer, policy),
        })
    }
}

#[async_trait]
impl Sink for ElasticsearchSink {
    fn id(&self) -> &ComponentId {
        self.core.id()
    }

    fn connect(&self, source: &dyn Source) {
        self.core.connect(source);
    }

    async fn stop(&self) {
        self.core.stop().await;
    }
}

// ---------------------------------------------------------------------------
// Index names
// ---------------------------------------------------------------------------

/// An index name with `%{+FORMAT}` placeholders filled from the record
/// timestamp. `FORMAT` understands `YYYY`, `MM`, `dd` and `HH`; any other
/// text is copied as is.
#[derive(Debug, Clone)]
pub struct IndexTemplate {
    parts: Vec<Part>,
}

#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    Time(String),
}

impl IndexTemplate {
    pub fn parse(template: &str) -> Result<Self, regex::Error> {
        let placeholder = Regex::new(r"%\{\+([^}]+)\}")?;
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in placeholder.captures_iter(template) {
            let (Some(whole), Some(format)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                parts.push(Part::Literal(template[last..whole.start()].to_string()));
            }
            parts.push(Part::Time(strftime(format.as_str())));
            last = whole.end();
        }
        if last < template.len() {
            parts.push(Part::Literal(template[last..].to_string()));
        }
        Ok(Self { parts })
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Literal(text) => text.clone(),
                Part::Time(format) => at.format(format).to_string(),
            })
            .collect()
    }
}

fn strftime(format: &str) -> String {
    format
        .replace('%', "%%")
        .replace("YYYY", "%Y")
        .replace("MM", "%m")
        .replace("dd", "%d")
        .replace("HH", "%H")
}

/// The `_bulk` request body for `batch`.
pub fn bulk_body(index: &IndexTemplate, batch: &[SharedRecord]) -> Result<String, SinkError> {
    let mut body = String::new();
    for record in batch {
        let action = json!({ "index": { "_index": index.render(record.timestamp) } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&LogRecord::to_json(record)?);
        body.push('\n');
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct BulkWriter {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoints: Vec<String>,
    next: usize,
    index: IndexTemplate,
    timeout: Duration,
    backoff: Backoff,
    shutdown: CancellationToken,
}

#[async_trait]
impl BatchWriter for BulkWriter {
    async fn write_batch(&mut self, batch: &[SharedRecord]) -> Result<(), SinkError> {
        let body = Bytes::from(bulk_body(&self.index, batch)?);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let endpoint = self.endpoints[self.next % self.endpoints.len()].clone();
            self.next = self.next.wrapping_add(1);

            match self.post(&endpoint, body.clone()).await {
                Ok(reply) => {
                    report_item_errors(&reply, batch.len());
                    debug!(records = batch.len(), %endpoint, "bulk request accepted");
                    return Ok(());
                }
                Err(e) if attempt >= MAX_ATTEMPTS || !retryable(&e) => return Err(e),
                Err(e) => {
                    debug!(attempt, %endpoint, error = %e, "bulk request failed; retrying");
                    if !self.backoff.pause(attempt, &self.shutdown).await {
                        return Err(e);
                    }
                }
            }
        }
    }
}

impl BulkWriter {
    async fn post(&self, endpoint: &str, body: Bytes) -> Result<Value, SinkError> {
        let request = Request::post(endpoint)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(Full::new(body))?;

        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| SinkError::Timeout(self.timeout))??;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            return Err(SinkError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).chars().take(512).collect(),
            });
        }
        Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }
}

fn retryable(error: &SinkError) -> bool {
    match error {
        SinkError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        SinkError::Http(_) | SinkError::Encode(_) => false,
        _ => true,
    }
}

fn report_item_errors(reply: &Value, sent: usize) {
    if reply.get("errors").and_then(Value::as_bool) != Some(true) {
        return;
    }
    let failed = reply
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.pointer("/index/error").is_some())
                .count()
        })
        .unwrap_or(0);
    warn!(failed, sent, "elasticsearch rejected documents");
}
