//! `stdout` output: the local sink.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use shiplog_core::config::{StdoutCodec, StdoutOutput};
use shiplog_core::{ComponentId, LogRecord, SharedRecord, Sink, Source};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::SinkError;
use crate::runner::{BatchPolicy, BatchWriter, SinkCore};

const POLICY: BatchPolicy = BatchPolicy {
    max_records: 64,
    flush_interval: Duration::from_millis(200),
};

pub struct StdoutSink {
    core: SinkCore,
}

impl StdoutSink {
    pub fn new(id: ComponentId, output: &StdoutOutput) -> Self {
        Self::with_writer(id, output.codec, tokio::io::stdout())
    }

    /// Write to `out` instead of the process's standard output.
    pub fn with_writer<W>(id: ComponentId, codec: StdoutCodec, out: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer = StreamWriter { codec, out };
        Self {
            core: SinkCore::start(id, writer, POLICY),
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
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

struct StreamWriter<W> {
    codec: StdoutCodec,
    out: W,
}

#[async_trait]
impl<W> BatchWriter for StreamWriter<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn write_batch(&mut self, batch: &[SharedRecord]) -> Result<(), SinkError> {
        let mut buf = String::new();
        for record in batch {
            buf.push_str(&encode(self.codec, record)?);
            buf.push('\n');
        }
        self.out.write_all(buf.as_bytes()).await?;
        self.out.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.out.flush().await;
    }
}

/// One output line, without its newline.
pub fn encode(codec: StdoutCodec, record: &LogRecord) -> Result<String, SinkError> {
    match codec {
        StdoutCodec::Json => Ok(record.to_json()?),
        StdoutCodec::Line => Ok(format!(
            "{} {} {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            record.host,
            record.message.as_deref().unwrap_or_default()
        )),
    }
}
