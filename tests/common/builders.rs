//! Test builders: ergonomic constructors for configurations and pipelines.
//!
//! These builders are designed for readability in test assertions, not for
//! production use. They panic on invalid input rather than returning `Result`.

use std::path::Path;

use shiplog::{ComponentFactory, Configuration, Pipeline};
use shiplog_core::config::{FileInput, StdinInput, StdoutCodec, StdoutOutput, TcpInput};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Fluent builder for [`Configuration`] fixtures.
///
/// ```rust
/// let config = ConfigBuilder::new().stdout(2).stdin(3).build();
/// assert_eq!(config.outputs().len(), 2);
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Configuration,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` `stdout` outputs using the json codec.
    pub fn stdout(mut self, n: usize) -> Self {
        for _ in 0..n {
            self.config.stdout.push(StdoutOutput {
                codec: StdoutCodec::Json,
            });
        }
        self
    }

    /// Add `n` `stdin` inputs tagged `stdin-<k>`.
    pub fn stdin(mut self, n: usize) -> Self {
        for _ in 0..n {
            let k = self.config.stdin.len();
            self.config.stdin.push(StdinInput {
                type_tag: Some(format!("stdin-{k}")),
                tags: Vec::new(),
            });
        }
        self
    }

    /// Add a `tcp` input on `127.0.0.1:<port>`; port 0 picks a free one.
    pub fn tcp(mut self, port: u16) -> Self {
        self.config.tcp.push(TcpInput {
            port,
            bind: "127.0.0.1".to_string(),
            ..TcpInput::default()
        });
        self
    }

    /// Add a `log` input following `path` from its beginning.
    pub fn log_file(mut self, path: &Path) -> Self {
        let mut input = FileInput::new(path);
        input.start_from_beginning = true;
        input.poll_interval_ms = 20;
        self.config.log.push(input);
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

// ---------------------------------------------------------------------------
// Pipeline helpers
// ---------------------------------------------------------------------------

/// Assemble `config` with `factory` and a fresh cancellation token.
pub fn assemble(config: Configuration, factory: &dyn ComponentFactory) -> Pipeline {
    Pipeline::assemble_with(config, factory, CancellationToken::new())
        .expect("pipeline assembly failed")
}
