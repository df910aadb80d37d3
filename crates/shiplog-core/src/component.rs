//! Source and sink capability contracts, plus the plumbing between them.
//!
//! # Wiring
//!
//! ```text
//!  Source ──Fanout──┬── link (mpsc) ──► Sink A
//!                   ├── link (mpsc) ──► Sink B
//!                   └── link (mpsc) ──► Sink C
//! ```
//!
//! Every [`Sink::connect`] call subscribes a fresh bounded channel on the
//! source's [`Fanout`]. A link therefore preserves the source's emission order
//! for that sink, and a slow sink applies backpressure to its sources instead
//! of losing records. When a source finishes it closes its fan-out, every link
//! channel drains and then ends, and the sink's link tasks exit on their own.
//!
//! Sources wait on a shared [`Gate`] before publishing. The pipeline opens the
//! gate only once every link exists, so no record is emitted before all sinks
//! are attached.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::counters::ProcessCounters;
use crate::error::SourceError;
use crate::types::LogRecord;

/// Records are shared between sinks without copying.
pub type SharedRecord = Arc<LogRecord>;

/// Buffered records per link before the source is held back.
pub const LINK_CAPACITY: usize = 1_024;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Stable component identity used in diagnostics: `<section>#<index>`, where
/// the index counts declarations of that section in construction order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId {
    pub section: &'static str,
    pub index: usize,
}

impl ComponentId {
    pub fn new(section: &'static str, index: usize) -> Self {
        Self { section, index }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.section, self.index)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// An input producing a stream of records.
///
/// Implementations may start their I/O at construction but must not publish
/// before [`SourceContext::gate`] opens.
pub trait Source: Send + Sync {
    fn id(&self) -> &ComponentId;

    /// Register a new subscriber. Called once per connected sink.
    fn subscribe(&self) -> RecordStream;

    /// Stop producing. Calling it again, or before anything was produced,
    /// has no further effect. Subscribers see their streams end once the
    /// source's task has wound down.
    fn stop(&self) -> Result<(), SourceError>;

    fn is_stopped(&self) -> bool;
}

/// An output forwarding records to one destination.
#[async_trait]
pub trait Sink: Send + Sync {
    fn id(&self) -> &ComponentId;

    /// Attach to `source`. Never blocks: consumption happens on a spawned
    /// link task. Destination failures are retried inside the sink.
    fn connect(&self, source: &dyn Source);

    /// Drain links whose sources have ended, flush buffered records and stop
    /// the writer. Idempotent.
    async fn stop(&self);
}

// ---------------------------------------------------------------------------
// Construction contexts
// ---------------------------------------------------------------------------

/// Everything a source receives at construction.
#[derive(Clone)]
pub struct SourceContext {
    /// Process-wide shutdown signal. Sources derive their own stop token
    /// from it with [`CancellationToken::child_token`].
    pub shutdown: CancellationToken,
    pub counters: Arc<ProcessCounters>,
    pub gate: Gate,
}

/// Everything a sink receives at construction.
#[derive(Clone)]
pub struct SinkContext {
    pub shutdown: CancellationToken,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// One-shot signal opened after wiring completes. Never closes again.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Gate::open`] has been called.
    pub async fn opened(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// The subscriber side of one link.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<SharedRecord>,
}

impl RecordStream {
    /// Next record, or `None` once the source closed and the link drained.
    pub async fn recv(&mut self) -> Option<SharedRecord> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SharedRecord> {
        self.rx.try_recv().ok()
    }
}

/// Publisher side of a source: one bounded channel per subscriber.
#[derive(Debug, Default)]
pub struct Fanout {
    subscribers: Mutex<Vec<mpsc::Sender<SharedRecord>>>,
    closed: AtomicBool,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. Subscribing to a closed fan-out yields a stream that
    /// ends immediately.
    pub fn subscribe(&self) -> RecordStream {
        let (tx, rx) = mpsc::channel(LINK_CAPACITY);
        let mut subscribers = self.lock();
        // Checked under the lock so a concurrent `close` cannot miss `tx`.
        if !self.closed.load(Ordering::Acquire) {
            subscribers.push(tx);
        }
        RecordStream { rx }
    }

    /// Deliver `record` to every live subscriber in subscription order and
    /// return how many accepted it. Waits while any link is full.
    pub async fn publish(&self, record: LogRecord) -> usize {
        let record = Arc::new(record);
        let senders: Vec<_> = self.lock().clone();

        let mut delivered = 0;
        let mut saw_closed = false;
        for tx in &senders {
            if tx.send(Arc::clone(&record)).await.is_ok() {
                delivered += 1;
            } else {
                saw_closed = true;
            }
        }
        if saw_closed {
            self.lock().retain(|tx| !tx.is_closed());
        }
        delivered
    }

    /// Drop every subscriber channel. Buffered records still drain.
    pub fn close(&self) {
        let mut subscribers = self.lock();
        self.closed.store(true, Ordering::Release);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<SharedRecord>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
