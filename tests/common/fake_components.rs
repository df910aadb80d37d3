//! FakeComponents: a [`ComponentFactory`] whose sources emit a fixed script
//! and whose sinks record everything they receive.
//!
//! Every lifecycle call (`build`, `connect`, `stop`, `drop`) is appended to a
//! shared event log so harnesses can assert ordering and idempotency without
//! touching real I/O.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use shiplog::{
    BuiltinComponents, ComponentFactory, ComponentId, InputDeclaration, InputKind, LogRecord,
    OutputDeclaration, PipelineError, Sink, SinkContext, Source, SourceContext, SourceError,
};
use shiplog_core::{Fanout, RecordStream, SharedRecord};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Default)]
pub struct FakeComponents {
    events: EventLog,
    received: Arc<Mutex<BTreeMap<String, Vec<SharedRecord>>>>,
    script: Arc<Vec<String>>,
    fail_source_at: Option<usize>,
    builtin_sources: bool,
    stop_fails: bool,
    sources_built: Arc<AtomicUsize>,
}

impl FakeComponents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fake source publishes `<source id>:<message>` for each message
    /// once the gate opens, then ends its stream.
    pub fn emitting(mut self, messages: &[&str]) -> Self {
        self.script = Arc::new(messages.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Fail the `n`-th source construction (0-based, across all sections).
    pub fn failing_source_at(mut self, n: usize) -> Self {
        self.fail_source_at = Some(n);
        self
    }

    /// Fake sources report a failure from every `stop` call.
    pub fn failing_stop(mut self) -> Self {
        self.stop_fails = true;
        self
    }

    /// Build real sources through [`BuiltinComponents`]; sinks stay fake.
    pub fn with_builtin_sources(mut self) -> Self {
        self.builtin_sources = true;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_events(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }

    /// Records received so far by the sink with id `sink`.
    pub fn received(&self, sink: &str) -> Vec<SharedRecord> {
        self.received
            .lock()
            .unwrap()
            .get(sink)
            .cloned()
            .unwrap_or_default()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ComponentFactory for FakeComponents {
    fn build_sink(
        &self,
        decl: &OutputDeclaration,
        index: usize,
        _ctx: &SinkContext,
    ) -> Result<Box<dyn Sink>, PipelineError> {
        let id = ComponentId::new(decl.kind().section(), index);
        self.log(format!("build sink {id}"));
        self.received.lock().unwrap().entry(id.to_string()).or_default();
        Ok(Box::new(RecordingSink {
            id,
            received: Arc::clone(&self.received),
            events: Arc::clone(&self.events),
            links: TaskTracker::new(),
        }))
    }

    fn build_source(
        &self,
        decl: &InputDeclaration,
        index: usize,
        ctx: &SourceContext,
    ) -> Result<Box<dyn Source>, PipelineError> {
        let ordinal = self.sources_built.fetch_add(1, Ordering::SeqCst);
        let id = ComponentId::new(decl.kind().section(), index);
        if self.fail_source_at == Some(ordinal) {
            self.log(format!("fail source {id}"));
            return Err(PipelineError::construction(id.to_string(), "injected failure"));
        }
        self.log(format!("build source {id}"));
        if self.builtin_sources {
            return BuiltinComponents.build_source(decl, index, ctx);
        }
        Ok(Box::new(ScriptedSource::spawn(
            id,
            decl.kind(),
            decl.type_tag(),
            Arc::clone(&self.script),
            ctx,
            Arc::clone(&self.events),
            self.stop_fails,
        )))
    }
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

pub struct ScriptedSource {
    id: ComponentId,
    fanout: Arc<Fanout>,
    stop: CancellationToken,
    events: EventLog,
    stop_fails: bool,
}

impl ScriptedSource {
    fn spawn(
        id: ComponentId,
        input: InputKind,
        type_tag: String,
        script: Arc<Vec<String>>,
        ctx: &SourceContext,
        events: EventLog,
        stop_fails: bool,
    ) -> Self {
        let fanout = Arc::new(Fanout::new());
        let stop = ctx.shutdown.child_token();

        let task_fanout = Arc::clone(&fanout);
        let task_stop = stop.clone();
        let gate = ctx.gate.clone();
        let counters = Arc::clone(&ctx.counters);
        let prefix = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_stop.cancelled() => {
                    task_fanout.close();
                    return;
                }
                () = gate.opened() => {}
            }
            for message in script.iter() {
                let record = LogRecord::new(input, type_tag.clone())
                    .with_message(format!("{prefix}:{message}"));
                counters.increment_message_count(1);
                task_fanout.publish(record).await;
            }
            task_fanout.close();
        });

        Self {
            id,
            fanout,
            stop,
            events,
            stop_fails,
        }
    }
}

impl Source for ScriptedSource {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn subscribe(&self) -> RecordStream {
        self.fanout.subscribe()
    }

    fn stop(&self) -> Result<(), SourceError> {
        self.events.lock().unwrap().push(format!("stop source {}", self.id));
        self.stop.cancel();
        self.fanout.close();
        if self.stop_fails {
            return Err(SourceError::Shutdown {
                id: self.id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

pub struct RecordingSink {
    id: ComponentId,
    received: Arc<Mutex<BTreeMap<String, Vec<SharedRecord>>>>,
    events: EventLog,
    links: TaskTracker,
}

#[async_trait]
impl Sink for RecordingSink {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn connect(&self, source: &dyn Source) {
        self.events
            .lock()
            .unwrap()
            .push(format!("connect {} <- {}", self.id, source.id()));
        let mut stream = source.subscribe();
        let received = Arc::clone(&self.received);
        let key = self.id.to_string();
        self.links.spawn(async move {
            while let Some(record) = stream.recv().await {
                received
                    .lock()
                    .unwrap()
                    .entry(key.clone())
                    .or_default()
                    .push(record);
            }
        });
    }

    async fn stop(&self) {
        self.events.lock().unwrap().push(format!("stop sink {}", self.id));
        self.links.close();
        self.links.wait().await;
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("drop sink {}", self.id));
        }
    }
}
