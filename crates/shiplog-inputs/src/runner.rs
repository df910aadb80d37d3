//! Per-source task runner shared by every input kind.
//!
//! [`spawn_source`] starts one tokio task per source. The task:
//!
//! 1. waits for the wiring [`Gate`](shiplog_core::Gate) (or a stop request),
//! 2. runs the input-specific future until it finishes, fails, or is stopped,
//! 3. closes the source's [`Fanout`], which ends every subscriber stream.
//!
//! The stop token is a child of the shared shutdown signal, so cancelling the
//! process-wide token also winds sources down.

use std::future::Future;
use std::sync::Arc;

use shiplog_core::{
    ComponentId, Fanout, InputDeclaration, InputKind, LogRecord, ProcessCounters, RecordStream,
    Source, SourceContext, SourceError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// The [`Source`] handed to the pipeline for every spawned input.
#[derive(Debug)]
pub struct SourceHandle {
    id: ComponentId,
    fanout: Arc<Fanout>,
    stop: CancellationToken,
}

impl Source for SourceHandle {
    fn id(&self) -> &ComponentId {
        &self.id
    }

    fn subscribe(&self) -> RecordStream {
        self.fanout.subscribe()
    }

    fn stop(&self) -> Result<(), SourceError> {
        if !self.stop.is_cancelled() {
            debug!(source = %self.id, "stop requested");
            self.stop.cancel();
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Publishing half given to the input-specific future.
#[derive(Debug, Clone)]
pub struct Emitter {
    id: ComponentId,
    input: InputKind,
    type_tag: Arc<str>,
    tags: Arc<[String]>,
    fanout: Arc<Fanout>,
    counters: Arc<ProcessCounters>,
}

impl Emitter {
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn counters(&self) -> &Arc<ProcessCounters> {
        &self.counters
    }

    /// A fresh record stamped with this source's kind, type tag and tags.
    pub fn record(&self) -> LogRecord {
        LogRecord::new(self.input, self.type_tag.as_ref()).with_tags(self.tags.iter().cloned())
    }

    /// Count and publish one record to every subscriber.
    pub async fn emit(&self, record: LogRecord) {
        self.counters.increment_message_count(1);
        self.fanout.publish(record).await;
    }
}

/// Spawn the task for one input declaration.
///
/// `run` receives the [`Emitter`] and the source's stop token. It is only
/// polled after the gate opens and is dropped as soon as the source stops.
pub fn spawn_source<F, Fut>(
    id: ComponentId,
    decl: &InputDeclaration,
    ctx: &SourceContext,
    run: F,
) -> SourceHandle
where
    F: FnOnce(Emitter, CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), SourceError>> + Send + 'static,
{
    let fanout = Arc::new(Fanout::new());
    let stop = ctx.shutdown.child_token();
    let emitter = Emitter {
        id: id.clone(),
        input: decl.kind(),
        type_tag: Arc::from(decl.type_tag()),
        tags: Arc::from(decl.tags().to_vec()),
        fanout: Arc::clone(&fanout),
        counters: Arc::clone(&ctx.counters),
    };

    let gate = ctx.gate.clone();
    let task_stop = stop.clone();
    let task_fanout = Arc::clone(&fanout);
    let span = tracing::debug_span!("source", id = %id);
    let task_id = id.clone();

    tokio::spawn(
        async move {
            tokio::select! {
                biased;
                () = task_stop.cancelled() => {
                    task_fanout.close();
                    return;
                }
                () = gate.opened() => {}
            }
            debug!("source started");

            let result = tokio::select! {
                biased;
                () = task_stop.cancelled() => Ok(()),
                result = run(emitter, task_stop.clone()) => result,
            };
            match result {
                Ok(()) => debug!("source finished"),
                Err(e) => warn!(source = %task_id, error = %e, "source failed"),
            }
            task_fanout.close();
        }
        .instrument(span),
    );

    SourceHandle { id, fanout, stop }
}
