//! `redis` output: `RPUSH` each batch onto a list.
//!
//! Speaks RESP directly over a tokio TCP stream. A broken connection is
//! dropped and re-established on the next attempt, rotating through the
//! configured hosts.

use std::time::Duration;

use async_trait::async_trait;
use shiplog_core::config::RedisOutput;
use shiplog_core::{ComponentId, PipelineError, SharedRecord, Sink, SinkContext, Source};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::elasticsearch::MAX_ATTEMPTS;
use crate::error::SinkError;
use crate::runner::{Backoff, BatchPolicy, BatchWriter, SinkCore};

pub struct RedisSink {
    core: SinkCore,
}

impl RedisSink {
    pub fn new(id: ComponentId, output: &RedisOutput, ctx: &SinkContext) -> Result<Self, PipelineError> {
        if output.host.is_empty() {
            return Err(PipelineError::construction(id.to_string(), SinkError::NoHosts));
        }
        let writer = RpushWriter {
            endpoints: output
                .host
                .iter()
                .map(|host| format!("{host}:{}", output.port))
                .collect(),
            next: 0,
            key: output.key.clone(),
            conn: None,
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
impl Sink for RedisSink {
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
// RESP
// ---------------------------------------------------------------------------

/// Encode a command as a RESP array of bulk strings.
pub fn encode_command<I, A>(args: I) -> Vec<u8>
where
    I: IntoIterator<Item = A>,
    A: AsRef<[u8]>,
{
    let args: Vec<A> = args.into_iter().collect();
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in &args {
        let arg = arg.as_ref();
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Parse an integer reply (`:n`) such as the list length `RPUSH` returns.
pub fn parse_integer_reply(line: &str) -> Result<i64, SinkError> {
    let line = line.trim_end();
    if let Some(n) = line.strip_prefix(':') {
        return n
            .parse()
            .map_err(|_| SinkError::Protocol(format!("bad integer reply {line:?}")));
    }
    if let Some(message) = line.strip_prefix('-') {
        return Err(SinkError::Protocol(message.to_string()));
    }
    Err(SinkError::Protocol(format!("unexpected reply {line:?}")))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct RpushWriter {
    endpoints: Vec<String>,
    next: usize,
    key: String,
    conn: Option<BufStream<TcpStream>>,
    timeout: Duration,
    backoff: Backoff,
    shutdown: CancellationToken,
}

#[async_trait]
impl BatchWriter for RpushWriter {
    async fn write_batch(&mut self, batch: &[SharedRecord]) -> Result<(), SinkError> {
        let mut args = Vec::with_capacity(batch.len() + 2);
        args.push(b"RPUSH".to_vec());
        args.push(self.key.as_bytes().to_vec());
        for record in batch {
            args.push(record.to_json()?.into_bytes());
        }
        let command = encode_command(args);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(self.timeout, self.send(&command)).await {
                Ok(Ok(length)) => {
                    debug!(records = batch.len(), length, "rpush accepted");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    self.conn = None;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "rpush failed; reconnecting");
                }
                Err(_) => {
                    self.conn = None;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(SinkError::Timeout(self.timeout));
                    }
                    debug!(attempt, "rpush timed out; reconnecting");
                }
            }
            if !self.backoff.pause(attempt, &self.shutdown).await {
                return Err(SinkError::Protocol("shutdown during retry".to_string()));
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.shutdown().await;
        }
    }
}

impl RpushWriter {
    async fn send(&mut self, command: &[u8]) -> Result<i64, SinkError> {
        if self.conn.is_none() {
            let endpoint = &self.endpoints[self.next % self.endpoints.len()];
            self.next = self.next.wrapping_add(1);
            let stream = TcpStream::connect(endpoint.as_str()).await?;
            debug!(%endpoint, "connected to redis");
            self.conn = Some(BufStream::new(stream));
        }
        let Some(conn) = self.conn.as_mut() else {
            return Err(SinkError::Protocol("no connection".to_string()));
        };
        conn.write_all(command).await?;
        conn.flush().await?;

        let mut reply = String::new();
        if conn.read_line(&mut reply).await? == 0 {
            return Err(SinkError::Protocol("connection closed".to_string()));
        }
        parse_integer_reply(&reply)
    }
}
