//! Link and writer tasks shared by every output kind.
//!
//! ```text
//!  source A ──link task──┐
//!  source B ──link task──┼──► queue (mpsc) ──► writer task ──► BatchWriter
//!  source C ──link task──┘
//! ```
//!
//! A link task forwards one source's stream into the sink's queue, so each
//! source's order is preserved and a slow destination holds its sources back
//! through the bounded channels. The writer batches by size and by interval
//! and hands each batch to the output-specific [`BatchWriter`].
//!
//! [`SinkCore::stop`] waits for the links to end (their sources were stopped
//! first), closes the queue, and lets the writer flush what is left.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use shiplog_core::component::LINK_CAPACITY;
use shiplog_core::{ComponentId, SharedRecord, Source};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn, Instrument};

use crate::error::SinkError;

/// How long `stop` waits for link tasks to drain.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `stop` waits for the writer's final flush.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers batches to one destination.
#[async_trait]
pub trait BatchWriter: Send + 'static {
    /// Deliver `batch`. Retrying is the writer's job; an error here means
    /// the batch is dropped.
    async fn write_batch(&mut self, batch: &[SharedRecord]) -> Result<(), SinkError>;

    /// Called once after the final batch.
    async fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub max_records: usize,
    pub flush_interval: Duration,
}

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            factor: 2,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..attempt {
            delay = delay.saturating_mul(self.factor);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }

    /// Sleep before retry `attempt`. Returns false when `shutdown` fired
    /// first and the caller should give up.
    pub async fn pause(&self, attempt: u32, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            () = shutdown.cancelled() => false,
            () = tokio::time::sleep(self.delay(attempt)) => true,
        }
    }
}

/// The shared half of every sink.
pub struct SinkCore {
    id: ComponentId,
    queue: Mutex<Option<mpsc::Sender<SharedRecord>>>,
    links: TaskTracker,
    writer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    abort: CancellationToken,
    stopped: AtomicBool,
    _abort_on_drop: DropGuard,
}

impl SinkCore {
    /// Spawn the writer task for `writer`.
    pub fn start<W: BatchWriter>(id: ComponentId, writer: W, policy: BatchPolicy) -> Self {
        let (tx, rx) = mpsc::channel(LINK_CAPACITY);
        let abort = CancellationToken::new();
        let span = tracing::debug_span!("sink", id = %id);
        let handle = tokio::spawn(write_loop(writer, rx, policy, abort.clone()).instrument(span));
        Self {
            id,
            queue: Mutex::new(Some(tx)),
            links: TaskTracker::new(),
            writer: tokio::sync::Mutex::new(Some(handle)),
            _abort_on_drop: abort.clone().drop_guard(),
            abort,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Number of links still forwarding records.
    pub fn open_links(&self) -> usize {
        self.links.len()
    }

    pub fn connect(&self, source: &dyn Source) {
        let Some(queue) = self.lock_queue().clone() else {
            warn!(sink = %self.id, source = %source.id(), "connect after stop ignored");
            return;
        };
        let mut stream = source.subscribe();
        let abort = self.abort.clone();
        let span = tracing::trace_span!("link", sink = %self.id, source = %source.id());
        debug!(sink = %self.id, source = %source.id(), "link established");

        self.links.spawn(
            async move {
                loop {
                    let record = tokio::select! {
                        () = abort.cancelled() => break,
                        record = stream.recv() => record,
                    };
                    let Some(record) = record else { break };
                    if queue.send(record).await.is_err() {
                        break;
                    }
                }
            }
            .instrument(span),
        );
    }

    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.links.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.links.wait()).await.is_err() {
            warn!(sink = %self.id, open = self.links.len(), "links did not drain; abandoning them");
            self.abort.cancel();
        }
        drop(self.lock_queue().take());

        let writer = self.writer.lock().await.take();
        if let Some(handle) = writer {
            match tokio::time::timeout(FLUSH_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(sink = %self.id, "sink stopped"),
                Ok(Err(e)) => warn!(sink = %self.id, error = %e, "writer task failed"),
                Err(_) => {
                    warn!(sink = %self.id, "final flush timed out");
                    self.abort.cancel();
                }
            }
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<SharedRecord>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn write_loop<W: BatchWriter>(
    mut writer: W,
    mut rx: mpsc::Receiver<SharedRecord>,
    policy: BatchPolicy,
    abort: CancellationToken,
) {
    let max_records = policy.max_records.max(1);
    let mut batch: Vec<SharedRecord> = Vec::with_capacity(max_records);
    let mut ticker = tokio::time::interval(policy.flush_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = abort.cancelled() => {
                if !batch.is_empty() {
                    warn!(dropped = batch.len(), "sink aborted with unsent records");
                }
                return;
            }
            record = rx.recv() => match record {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= max_records {
                        flush(&mut writer, &mut batch).await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&mut writer, &mut batch).await;
                }
            }
        }
    }

    if !batch.is_empty() {
        flush(&mut writer, &mut batch).await;
    }
    writer.close().await;
}

async fn flush<W: BatchWriter>(writer: &mut W, batch: &mut Vec<SharedRecord>) {
    if let Err(e) = writer.write_batch(batch).await {
        warn!(dropped = batch.len(), error = %e, "batch delivery failed");
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSource;
    use pretty_assertions::assert_eq;
    use shiplog_core::{InputKind, LogRecord};
    use std::sync::Arc;

    /// Records every batch it is handed.
    #[derive(Clone, Default)]
    struct Collecting {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BatchWriter for Collecting {
        async fn write_batch(&mut self, batch: &[SharedRecord]) -> Result<(), SinkError> {
            let messages = batch.iter().filter_map(|r| r.message.clone()).collect();
            self.batches.lock().unwrap().push(messages);
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn record(message: &str) -> LogRecord {
        LogRecord::new(InputKind::Stdin, "stdin").with_message(message)
    }

    #[test]
    fn backoff_grows_then_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
            factor: 2,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(350));
        assert_eq!(backoff.delay(10), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn pause_returns_early_on_shutdown() {
        let backoff = Backoff {
            initial: Duration::from_secs(60),
            ..Backoff::default()
        };
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let resumed = tokio::time::timeout(Duration::from_secs(5), backoff.pause(1, &shutdown))
            .await
            .unwrap();
        assert!(!resumed);
    }

    #[tokio::test]
    async fn full_batches_flush_and_stop_flushes_the_rest() {
        let writer = Collecting::default();
        let core = SinkCore::start(
            ComponentId::new("stdout", 0),
            writer.clone(),
            BatchPolicy {
                max_records: 2,
                flush_interval: Duration::from_secs(3600),
            },
        );
        let source = StubSource::new(0);
        core.connect(&source);
        for m in ["a", "b", "c"] {
            source.publish(record(m)).await;
        }
        source.stop().unwrap();
        core.stop().await;

        let batches = writer.batches.lock().unwrap().clone();
        assert_eq!(batches, vec![vec!["a", "b"], vec!["c"]]);
        assert!(writer.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn interval_flushes_partial_batches() {
        let writer = Collecting::default();
        let core = SinkCore::start(
            ComponentId::new("stdout", 0),
            writer.clone(),
            BatchPolicy {
                max_records: 100,
                flush_interval: Duration::from_millis(20),
            },
        );
        let source = StubSource::new(0);
        core.connect(&source);
        source.publish(record("lonely")).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(writer.batches.lock().unwrap().concat(), vec!["lonely"]);

        source.stop().unwrap();
        core.stop().await;
    }

    #[tokio::test]
    async fn per_source_order_survives_interleaving() {
        let writer = Collecting::default();
        let core = SinkCore::start(
            ComponentId::new("stdout", 0),
            writer.clone(),
            BatchPolicy {
                max_records: 1_000,
                flush_interval: Duration::from_secs(3600),
            },
        );
        let (a, b) = (StubSource::new(0), StubSource::new(1));
        core.connect(&a);
        core.connect(&b);
        for n in 0..50 {
            a.publish(record(&format!("a{n}"))).await;
            b.publish(record(&format!("b{n}"))).await;
        }
        a.stop().unwrap();
        b.stop().unwrap();
        core.stop().await;

        let all = writer.batches.lock().unwrap().concat();
        assert_eq!(all.len(), 100);
        for prefix in ["a", "b"] {
            let seen: Vec<_> = all.iter().filter(|m| m.starts_with(prefix)).cloned().collect();
            let expected: Vec<_> = (0..50).map(|n| format!("{prefix}{n}")).collect();
            assert_eq!(seen, expected);
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_later_connects_are_ignored() {
        let writer = Collecting::default();
        let core = SinkCore::start(
            ComponentId::new("stdout", 0),
            writer.clone(),
            BatchPolicy {
                max_records: 10,
                flush_interval: Duration::from_secs(1),
            },
        );
        core.stop().await;
        core.stop().await;

        let late = StubSource::new(0);
        core.connect(&late);
        assert_eq!(late.subscriber_count(), 0);
        assert_eq!(core.open_links(), 0);
    }
}
