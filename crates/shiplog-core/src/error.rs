//! Error taxonomy for pipeline assembly and source lifecycle.
//!
//! Only [`PipelineError`] aborts startup. [`SourceError`] values surfacing
//! from [`Source::stop`](crate::component::Source::stop) are logged by the
//! pipeline and never escalated.

use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fatal startup conditions.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration not found: {} is neither a file nor a directory", path.display())]
    ConfigurationNotFound { path: PathBuf },

    #[error("configuration invalid: {}", path.display())]
    ConfigurationInvalid {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("cannot prepare diagnostics log at {}", path.display())]
    DiagnosticsBootstrapFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build {component}")]
    Construction {
        component: String,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    pub fn construction(component: impl Into<String>, source: impl Into<BoxError>) -> Self {
        PipelineError::Construction {
            component: component.into(),
            source: source.into(),
        }
    }
}

/// Errors raised by a running source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("{id} failed to stop: {reason}")]
    Shutdown { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watch(String),
}
