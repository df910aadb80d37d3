//! Diagnostics bootstrap: the agent's own logging.
//!
//! Two `fmt` layers sit behind one global gate:
//!
//! ```text
//!              ┌──► console (stderr)          min DEBUG
//! event ─gate──┤
//!              └──► <dir>/shiplog/shiplog.log min TRACE, rotated at 5 MiB
//! ```
//!
//! The gate is the caller-supplied [`Severity`]; anything below it is dropped
//! before either layer is consulted. The layer minimums are fixed, with the
//! file one step more verbose than the console.
//!
//! File output goes through `tracing_appender::non_blocking`: events are
//! queued and a dedicated thread does the writes and rotations, so slow disks
//! never stall runtime workers. The returned [`DiagnosticsHandle`] owns the
//! worker guard; dropping it flushes the queue.
//!
//! The log file rotates by size only. On rotation `shiplog.log` becomes
//! `shiplog.1.log`, older archives shift up by one, and anything past
//! [`MAX_ARCHIVES`] is deleted.

use std::fs::{self, File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;

use crate::error::PipelineError;
use crate::types::Severity;

pub const AGENT_NAME: &str = "shiplog";
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;
pub const MAX_ARCHIVES: usize = 5;
pub const CONSOLE_LEVEL: LevelFilter = LevelFilter::DEBUG;
pub const FILE_LEVEL: LevelFilter = LevelFilter::TRACE;

/// Returned by [`init`]; describes where diagnostics are written.
///
/// Hold it for the life of the process. Dropping it flushes queued file
/// output and stops the writer thread.
#[derive(Debug)]
pub struct DiagnosticsHandle {
    pub log_file: PathBuf,
    pub global: Severity,
    /// False when another subscriber was already installed.
    pub installed: bool,
    pub flush_guard: WorkerGuard,
}

/// Install the process-wide subscriber.
///
/// Creates `<log_dir>/shiplog/` if needed. Failing to create or open the log
/// file is fatal.
pub fn init(global: Severity, log_dir: &Path) -> Result<DiagnosticsHandle, PipelineError> {
    let dir = log_dir.join(AGENT_NAME);
    let log_file = dir.join(format!("{AGENT_NAME}.log"));
    let bootstrap_failure = |source| PipelineError::DiagnosticsBootstrapFailure {
        path: log_file.clone(),
        source,
    };

    fs::create_dir_all(&dir).map_err(bootstrap_failure)?;
    let file = RollingFile::open(&log_file, MAX_FILE_BYTES, MAX_ARCHIVES).map_err(bootstrap_failure)?;
    let (file_writer, flush_guard) = tracing_appender::non_blocking(file);

    let ansi = io::stderr().is_terminal();
    let subscriber = layered(global, io::stderr, ansi, file_writer);
    let installed = tracing::subscriber::set_global_default(subscriber).is_ok();
    if installed {
        tracing::info!(log_file = %log_file.display(), gate = %global, "diagnostics initialised");
    }

    Ok(DiagnosticsHandle {
        log_file,
        global,
        installed,
        flush_guard,
    })
}

/// Build the layered subscriber over arbitrary writers without installing
/// it. Both writers receive plain (non-ANSI) output.
pub fn build_subscriber<C, F>(global: Severity, console: C, file: F) -> impl Subscriber + Send + Sync
where
    C: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    layered(global, console, false, file)
}

fn layered<C, F>(global: Severity, console: C, ansi: bool, file: F) -> impl Subscriber + Send + Sync
where
    C: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let console_layer = fmt::layer()
        .with_writer(console)
        .with_ansi(ansi)
        .with_target(false)
        .with_filter(CONSOLE_LEVEL);

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_filter(FILE_LEVEL);

    tracing_subscriber::registry()
        .with(global.level_filter())
        .with(console_layer)
        .with(file_layer)
}

// ---------------------------------------------------------------------------
// Size-rotating file
// ---------------------------------------------------------------------------

/// An append-only log file that rotates once it would grow past `max_bytes`.
///
/// Owned by the non-blocking writer thread, so it needs no locking of its own.
#[derive(Debug)]
pub struct RollingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    max_archives: usize,
}

impl RollingFile {
    pub fn open(path: &Path, max_bytes: u64, max_archives: usize) -> io::Result<Self> {
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes,
            max_archives,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of archive `n` (1 = newest): `shiplog.log` → `shiplog.<n>.log`.
    pub fn archive_path(path: &Path, n: usize) -> PathBuf {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(AGENT_NAME);
        let name = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}.{n}.{ext}"),
            None => format!("{stem}.{n}"),
        };
        path.with_file_name(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_archives == 0 {
            self.file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.written = 0;
            return Ok(());
        }

        remove_if_exists(&Self::archive_path(&self.path, self.max_archives))?;
        for n in (1..self.max_archives).rev() {
            let from = Self::archive_path(&self.path, n);
            if from.exists() {
                fs::rename(&from, Self::archive_path(&self.path, n + 1))?;
            }
        }
        fs::rename(&self.path, Self::archive_path(&self.path, 1))?;

        self.file = open_append(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
