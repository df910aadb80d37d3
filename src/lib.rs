//! shiplog: host log-shipping agent.
//!
//! Reads a declarative configuration, builds every declared input source and
//! output sink, connects every sink to every source, and manages the
//! combined lifecycle through to a coordinated shutdown.
//!
//! # Architecture
//!
//! ```text
//!              ┌──► Sink (elasticsearch)
//! Source ──────┼──► Sink (redis)
//!              └──► Sink (stdout)
//!    ▲
//!    └── Pipeline: build sinks, build sources, wire, open gate, shutdown
//! ```
//!
//! The crate re-exports the core types so that integration tests and
//! embedders only need this one dependency.

pub mod factory;
pub mod orchestrator;

pub use factory::{BuiltinComponents, ComponentFactory};
pub use orchestrator::{Link, Pipeline, PipelineSnapshot};

pub use shiplog_core::{
    diagnostics, ComponentId, Configuration, InputDeclaration, InputKind, LogRecord,
    OutputDeclaration, OutputKind, PipelineError, ProcessCounters, Severity, Sink, SinkContext,
    Source, SourceContext, SourceError,
};
