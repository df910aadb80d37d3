//! shiplog-inputs: source adapters for shiplog.
//!
//! Every adapter runs on its own tokio task (see [`runner`]), turns raw input
//! into [`LogRecord`](shiplog_core::LogRecord)s and publishes them to every
//! connected sink once the pipeline's gate opens.
//!
//! | Section     | Adapter                               |
//! |-------------|---------------------------------------|
//! | `json`      | [`file`] follower + [`json::JsonLines`] |
//! | `iis`       | [`file`] follower + [`iis::W3cLines`]   |
//! | `os_event`  | [`journal`]                           |
//! | `log`       | [`file`] follower + [`file::PlainLines`] |
//! | `tcp`       | [`tcp::TcpSource`]                    |
//! | `stdin`     | [`stdin`]                             |

pub mod file;
pub mod iis;
pub mod journal;
pub mod json;
pub mod lines;
pub mod runner;
pub mod stdin;
pub mod tcp;

use shiplog_core::{ComponentId, InputDeclaration, PipelineError, Source, SourceContext};

pub use runner::{Emitter, SourceHandle};
pub use tcp::TcpSource;

/// Build and start the source for one declaration. `index` counts earlier
/// declarations of the same section.
pub fn build_source(
    decl: &InputDeclaration,
    index: usize,
    ctx: &SourceContext,
) -> Result<Box<dyn Source>, PipelineError> {
    let id = ComponentId::new(decl.kind().section(), index);
    let source: Box<dyn Source> = match decl {
        InputDeclaration::Json(input) => Box::new(file::spawn(id, decl, input, json::JsonLines, ctx)),
        InputDeclaration::Iis(input) => {
            Box::new(file::spawn(id, decl, input, iis::W3cLines::default(), ctx))
        }
        InputDeclaration::OsEvent(input) => Box::new(journal::spawn(id, decl, input, ctx)),
        InputDeclaration::Log(input) => Box::new(file::spawn(id, decl, input, file::PlainLines, ctx)),
        InputDeclaration::Tcp(input) => Box::new(TcpSource::bind(id, decl, input, ctx)?),
        InputDeclaration::Stdin(input) => Box::new(stdin::spawn(id, decl, input, ctx)),
    };
    Ok(source)
}
