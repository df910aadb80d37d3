//! shiplog-outputs: sink adapters for shiplog.
//!
//! Every sink is a [`runner::SinkCore`] (link tasks, one queue, one batching
//! writer task) around an output-specific [`runner::BatchWriter`]:
//!
//! | Section         | Sink                                    |
//! |-----------------|-----------------------------------------|
//! | `elasticsearch` | [`elasticsearch::ElasticsearchSink`]    |
//! | `redis`         | [`redis::RedisSink`]                    |
//! | `stdout`        | [`stdout::StdoutSink`]                  |

pub mod elasticsearch;
pub mod error;
pub mod redis;
pub mod runner;
pub mod stdout;

#[cfg(test)]
mod testing;

use shiplog_core::{ComponentId, OutputDeclaration, PipelineError, Sink, SinkContext};

pub use error::SinkError;

/// Build and start the sink for one declaration. `index` counts earlier
/// declarations of the same section.
pub fn build_sink(
    decl: &OutputDeclaration,
    index: usize,
    ctx: &SinkContext,
) -> Result<Box<dyn Sink>, PipelineError> {
    let id = ComponentId::new(decl.kind().section(), index);
    let sink: Box<dyn Sink> = match decl {
        OutputDeclaration::Elasticsearch(output) => {
            Box::new(elasticsearch::ElasticsearchSink::new(id, output, ctx)?)
        }
        OutputDeclaration::Redis(output) => Box::new(redis::RedisSink::new(id, output, ctx)?),
        OutputDeclaration::Stdout(output) => Box::new(stdout::StdoutSink::new(id, output)),
    };
    Ok(sink)
}
