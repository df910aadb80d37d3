//! Pipeline assembly and lifecycle.
//!
//! Assembly is two-phase:
//!
//! 1. **Build.** Every sink (`elasticsearch`, `redis`, `stdout`), then every
//!    source (`json`, `iis`, `os_event`, `log`, `tcp`, `stdin`), each in
//!    declaration order. Sources may start I/O but hold records back until
//!    the wiring gate opens.
//! 2. **Wire.** For each source in order, every sink connects to it. Once
//!    all `|sinks| × |sources|` links exist the gate opens.
//!
//! A failure in either phase stops every source built so far and drops every
//! sink, then surfaces as a [`PipelineError`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shiplog_core::{
    ComponentId, Configuration, Gate, PipelineError, ProcessCounters, Severity, Sink, SinkContext,
    Source, SourceContext,
};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::factory::{BuiltinComponents, ComponentFactory};

/// One established (sink, source) connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub sink: ComponentId,
    pub source: ComponentId,
}

/// Point-in-time view of a running pipeline, for periodic diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub sinks: Vec<String>,
    pub sources: Vec<String>,
    pub links: usize,
    pub stopped_sources: usize,
    pub active_connections: i64,
    pub message_count: u64,
}

pub struct Pipeline {
    config: Configuration,
    sinks: Vec<Box<dyn Sink>>,
    sources: Vec<Box<dyn Source>>,
    links: Vec<Link>,
    started_at: DateTime<Utc>,
    shutdown: CancellationToken,
    counters: Arc<ProcessCounters>,
    minimum_severity: Severity,
    log_dir: Option<PathBuf>,
    stopped: OnceCell<()>,
}

impl Pipeline {
    /// Load the configuration at `config_path` (a file or a directory of
    /// documents) and assemble the built-in components it declares.
    ///
    /// Must be called inside a tokio runtime. Diagnostics are expected to be
    /// initialised already; `minimum_severity` and `log_dir` are recorded
    /// for reporting.
    pub fn assemble(
        config_path: &Path,
        minimum_severity: Severity,
        log_dir: &Path,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let config = Configuration::load(config_path)?;
        info!(
            path = %config_path.display(),
            outputs = config.outputs().len(),
            inputs = config.inputs().len(),
            "configuration loaded"
        );
        let mut pipeline = Self::assemble_with(config, &BuiltinComponents, shutdown)?;
        pipeline.minimum_severity = minimum_severity;
        pipeline.log_dir = Some(log_dir.to_path_buf());
        Ok(pipeline)
    }

    /// Assemble an already loaded configuration with `factory`.
    pub fn assemble_with(
        config: Configuration,
        factory: &dyn ComponentFactory,
        shutdown: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let started_at = Utc::now();
        let counters = Arc::new(ProcessCounters::new());
        let gate = Gate::new();
        let mut assembly = Assembly::default();

        let sink_ctx = SinkContext {
            shutdown: shutdown.clone(),
        };
        let mut indices = SectionIndices::default();
        for decl in config.outputs() {
            let index = indices.next(decl.kind().section());
            let sink = factory.build_sink(&decl, index, &sink_ctx)?;
            debug!(sink = %sink.id(), "sink built");
            assembly.sinks.push(sink);
        }

        let source_ctx = SourceContext {
            shutdown: shutdown.clone(),
            counters: Arc::clone(&counters),
            gate: gate.clone(),
        };
        for decl in config.inputs() {
            let index = indices.next(decl.kind().section());
            let source = factory.build_source(&decl, index, &source_ctx)?;
            debug!(source = %source.id(), "source built");
            assembly.sources.push(source);
        }

        let (sinks, sources) = assembly.finish();
        let mut links = Vec::with_capacity(sinks.len() * sources.len());
        for source in &sources {
            for sink in &sinks {
                sink.connect(source.as_ref());
                links.push(Link {
                    sink: sink.id().clone(),
                    source: source.id().clone(),
                });
            }
        }
        gate.open();

        info!(
            sinks = sinks.len(),
            sources = sources.len(),
            links = links.len(),
            "pipeline assembled"
        );
        Ok(Self {
            config,
            sinks,
            sources,
            links,
            started_at,
            shutdown,
            counters,
            minimum_severity: Severity::Info,
            log_dir: None,
            stopped: OnceCell::new(),
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn sources(&self) -> &[Box<dyn Source>] {
        &self.sources
    }

    pub fn sinks(&self) -> &[Box<dyn Sink>] {
        &self.sinks
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn counters(&self) -> &Arc<ProcessCounters> {
        &self.counters
    }

    pub fn active_connections(&self) -> i64 {
        self.counters.active_connections()
    }

    pub fn message_count(&self) -> u64 {
        self.counters.message_count()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn minimum_severity(&self) -> Severity {
        self.minimum_severity
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.stopped.initialized()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            sinks: self.sinks.iter().map(|s| s.id().to_string()).collect(),
            sources: self.sources.iter().map(|s| s.id().to_string()).collect(),
            links: self.links.len(),
            stopped_sources: self.sources.iter().filter(|s| s.is_stopped()).count(),
            active_connections: self.active_connections(),
            message_count: self.message_count(),
        }
    }

    // -- mutation -----------------------------------------------------------

    /// Add `n` records to the pipeline total and return the new total.
    pub fn increment_message_count(&self, n: u64) -> u64 {
        self.counters.increment_message_count(n)
    }

    /// Stop every source in construction order, then drain and stop every
    /// sink. A source that fails to stop is logged and skipped. Later and
    /// concurrent calls wait for the first to finish and do nothing else.
    pub async fn shutdown(&self) {
        self.stopped
            .get_or_init(|| async {
                info!(sources = self.sources.len(), sinks = self.sinks.len(), "shutting down");
                for source in &self.sources {
                    if let Err(e) = source.stop() {
                        warn!(source = %source.id(), error = %e, "source failed to stop");
                    }
                }
                for sink in &self.sinks {
                    sink.stop().await;
                }
                info!(
                    messages = self.message_count(),
                    uptime_secs = (Utc::now() - self.started_at).num_seconds(),
                    "pipeline stopped"
                );
            })
            .await;
    }
}

/// Components built so far. Dropping it before [`Assembly::finish`] stops
/// every source; the sinks' drop guards cancel their tasks.
#[derive(Default)]
struct Assembly {
    sinks: Vec<Box<dyn Sink>>,
    sources: Vec<Box<dyn Source>>,
}

impl Assembly {
    fn finish(mut self) -> (Vec<Box<dyn Sink>>, Vec<Box<dyn Source>>) {
        (std::mem::take(&mut self.sinks), std::mem::take(&mut self.sources))
    }
}

impl Drop for Assembly {
    fn drop(&mut self) {
        if self.sinks.is_empty() && self.sources.is_empty() {
            return;
        }
        warn!(
            sinks = self.sinks.len(),
            sources = self.sources.len(),
            "assembly failed; releasing built components"
        );
        for source in &self.sources {
            if let Err(e) = source.stop() {
                warn!(source = %source.id(), error = %e, "source failed to stop");
            }
        }
    }
}

/// Per-section declaration counters used to number component ids.
#[derive(Default)]
struct SectionIndices(HashMap<&'static str, usize>);

impl SectionIndices {
    fn next(&mut self, section: &'static str) -> usize {
        let slot = self.0.entry(section).or_default();
        let index = *slot;
        *slot += 1;
        index
    }
}
