//! shiplog-core: shared foundation for the shiplog agent.
//!
//! This crate holds everything the input, output and orchestration crates
//! agree on: the [`LogRecord`] flowing through the pipeline, the
//! [`Configuration`] document, the [`Source`] / [`Sink`] capability traits and
//! their fan-out plumbing, the [`ProcessCounters`], and the diagnostics
//! bootstrap.
//!
//! # Architecture
//!
//! ```text
//! Configuration ──► Pipeline ──► Sinks ──connect──► Sources
//!                      │                              │
//!                      └──── ProcessCounters ◄────────┘
//! ```

pub mod component;
pub mod config;
pub mod counters;
pub mod diagnostics;
pub mod error;
pub mod types;

pub use component::{
    ComponentId, Fanout, Gate, RecordStream, SharedRecord, Sink, SinkContext, Source,
    SourceContext,
};
pub use config::{Configuration, InputDeclaration, OutputDeclaration};
pub use counters::{ConnectionGuard, ProcessCounters};
pub use error::{PipelineError, SourceError};
pub use types::{InputKind, LogRecord, OutputKind, Severity};
