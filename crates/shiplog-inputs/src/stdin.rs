//! `stdin` input: every line of standard input becomes `message`.

use shiplog_core::config::StdinInput;
use shiplog_core::{ComponentId, InputDeclaration, SourceContext, SourceError};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lines::LineReader;
use crate::runner::{spawn_source, Emitter, SourceHandle};

pub fn spawn(
    id: ComponentId,
    decl: &InputDeclaration,
    _input: &StdinInput,
    ctx: &SourceContext,
) -> SourceHandle {
    spawn_source(id, decl, ctx, |emitter, stop| {
        read_lines(tokio::io::stdin(), emitter, stop)
    })
}

/// Emit one record per non-empty line of `reader` until end of input.
pub async fn read_lines<R>(
    reader: R,
    emitter: Emitter,
    stop: CancellationToken,
) -> Result<(), SourceError>
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineReader::new(reader);
    loop {
        tokio::select! {
            () = stop.cancelled() => return Ok(()),
            line = lines.next_line() => match line? {
                Some(line) => emitter.emit(emitter.record().with_message(line)).await,
                None => {
                    debug!(source = %emitter.id(), "end of input");
                    return Ok(());
                }
            },
        }
    }
}
