//! File follower shared by the `log`, `json` and `iis` inputs.
//!
//! The follower keeps the file open and polls it on a fixed interval, and
//! additionally wakes on `notify` events for the containing directory. New
//! bytes are split into lines and handed to a [`LineParser`]; a trailing
//! partial line is held until its newline arrives.
//!
//! - **Start position**: the current end of file, or offset 0 when
//!   `start_from_beginning` is set.
//! - **Truncation**: a length below the read offset restarts from offset 0.
//! - **Rotation**: when the path names a different file (device and inode
//!   on unix) or disappears, the old handle is read to its end, its
//!   unterminated tail is flushed, and the new file is read from offset 0.
//! - **Missing file**: waited for; reading starts from its beginning once it
//!   appears.

use std::fs::Metadata;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use shiplog_core::config::FileInput;
use shiplog_core::{ComponentId, InputDeclaration, LogRecord, SourceContext, SourceError};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lines::LineBuffer;
use crate::runner::{spawn_source, Emitter, SourceHandle};

/// Largest chunk read at once.
const MAX_CHUNK: u64 = 1024 * 1024;

/// Turns one line of a followed file into a record, or nothing.
pub trait LineParser: Send + 'static {
    fn parse(&mut self, line: &str, record: LogRecord) -> Option<LogRecord>;
}

/// `log` input: every non-empty line becomes `message`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainLines;

impl LineParser for PlainLines {
    fn parse(&mut self, line: &str, record: LogRecord) -> Option<LogRecord> {
        Some(record.with_message(line))
    }
}

/// Start following `input.location` with `parser`.
pub fn spawn<P: LineParser>(
    id: ComponentId,
    decl: &InputDeclaration,
    input: &FileInput,
    parser: P,
    ctx: &SourceContext,
) -> SourceHandle {
    let follower = Follower {
        path: input.location.clone(),
        start_from_beginning: input.start_from_beginning,
        poll: Duration::from_millis(input.poll_interval_ms.max(10)),
    };
    spawn_source(id, decl, ctx, move |emitter, stop| follower.run(parser, emitter, stop))
}

// ---------------------------------------------------------------------------
// Follower
// ---------------------------------------------------------------------------

/// Which file a handle refers to, independent of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
fn identity(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

// No stable identity elsewhere; only truncation is detected.
#[cfg(not(unix))]
fn identity(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

/// The open file being followed.
struct Tail {
    file: File,
    identity: Option<FileIdentity>,
    offset: u64,
}

impl Tail {
    /// Read everything currently past `offset`.
    async fn read_available<P: LineParser>(
        &mut self,
        lines: &mut LineBuffer,
        parser: &mut P,
        emitter: &Emitter,
    ) -> Result<(), SourceError> {
        let mut chunk = Vec::new();
        loop {
            chunk.clear();
            let n = (&mut self.file).take(MAX_CHUNK).read_to_end(&mut chunk).await?;
            if n == 0 {
                return Ok(());
            }
            self.offset += n as u64;
            publish(lines.push(&chunk), parser, emitter).await;
        }
    }
}

async fn publish<P: LineParser>(lines: Vec<String>, parser: &mut P, emitter: &Emitter) {
    for line in lines {
        if let Some(record) = parser.parse(&line, emitter.record()) {
            emitter.emit(record).await;
        }
    }
}

struct Follower {
    path: PathBuf,
    start_from_beginning: bool,
    poll: Duration,
}

impl Follower {
    async fn run<P: LineParser>(
        self,
        mut parser: P,
        emitter: Emitter,
        stop: CancellationToken,
    ) -> Result<(), SourceError> {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = watch_parent(&self.path, wake_tx);

        let mut tail = self.open(!self.start_from_beginning).await?;
        let mut lines = LineBuffer::new();
        let mut ticker = tokio::time::interval(self.poll);
        debug!(
            path = %self.path.display(),
            offset = tail.as_ref().map(|t| t.offset),
            "following file"
        );

        loop {
            self.catch_up(&mut tail, &mut lines, &mut parser, &emitter).await?;

            tokio::select! {
                () = stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
                _ = wake_rx.recv() => {}
            }
        }
    }

    async fn open(&self, at_end: bool) -> Result<Option<Tail>, SourceError> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta = file.metadata().await?;
        let offset = if at_end { file.seek(SeekFrom::End(0)).await? } else { 0 };
        Ok(Some(Tail {
            file,
            identity: identity(&meta),
            offset,
        }))
    }

    async fn catch_up<P: LineParser>(
        &self,
        tail: &mut Option<Tail>,
        lines: &mut LineBuffer,
        parser: &mut P,
        emitter: &Emitter,
    ) -> Result<(), SourceError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(current) = tail.as_mut() {
            let replaced = match &meta {
                Some(meta) => current.identity.is_some() && identity(meta) != current.identity,
                None => true,
            };
            if replaced {
                current.read_available(lines, parser, emitter).await?;
                publish(lines.finish().into_iter().collect(), parser, emitter).await;
                debug!(path = %self.path.display(), "file replaced; reopening");
                *tail = None;
            } else if meta.as_ref().is_some_and(|m| m.len() < current.offset) {
                debug!(path = %self.path.display(), offset = current.offset, "file truncated; rereading");
                current.offset = current.file.seek(SeekFrom::Start(0)).await?;
                lines.clear();
            }
        }

        if tail.is_none() && meta.is_some() {
            *tail = self.open(false).await?;
        }
        if let Some(current) = tail.as_mut() {
            current.read_available(lines, parser, emitter).await?;
        }
        Ok(())
    }
}

fn watch_parent(path: &Path, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = wake.try_send(());
        }
    });
    match watcher {
        Ok(mut watcher) => match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => Some(watcher),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "file watch unavailable; polling only");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "file watcher unavailable; polling only");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
