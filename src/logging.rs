//! Logging setup.
//!
//! Installs a `tracing` subscriber with two sinks: stderr and an append-only
//! log file. Both can be switched at runtime. The level filter sits behind a
//! reload handle, stderr output behind a flag, and the file behind a shared
//! slot, so a worker can adopt the `verbalise`, `cli` and `log` settings the
//! supervisor published.
//!
//! Explicit settings win over the document: `--verbose` keeps debug output,
//! and `[logging] console` / `[logging] file` pin their sink.

use crate::flags::Flags;
use anyhow::{Context, Result, anyhow};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Level used when the flags ask for verbose output.
pub const VERBOSE_LEVEL: &str = "debug";

/// Level used otherwise.
pub const QUIET_LEVEL: &str = "info";

/// Log settings a worker takes over from the shared flags.
pub trait LogControl {
    /// Switch to debug output, or back to the configured level.
    fn set_verbose(&self, verbose: bool);

    /// Mirror log lines to stderr or stop doing so.
    fn set_console(&self, console: bool);

    /// Append log lines to `path`.
    fn set_log_file(&self, path: &Path);

    /// Apply `verbalise`, `cli` and `log` from a freshly read document.
    fn follow(&self, flags: &Flags) {
        self.set_verbose(flags.verbalise);
        self.set_console(flags.cli);
        self.set_log_file(&flags.log);
    }
}

/// Where log output goes and how much of it.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Mirror log lines to stderr. `None` starts enabled and follows the `cli` flag.
    pub console: Option<bool>,
    /// Append log lines to this file. `None` follows the `log` flag.
    pub file: Option<PathBuf>,
    /// Level directive used when not verbose, e.g. "info" or "flagsync=debug"
    pub level: String,
    /// Start at debug level and stay there
    pub verbose: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            console: None,
            file: None,
            level: QUIET_LEVEL.to_string(),
            verbose: false,
        }
    }
}

/// Filter directive for the requested verbosity.
pub fn level_for(verbose: bool, quiet_level: &str) -> &str {
    if verbose { VERBOSE_LEVEL } else { quiet_level }
}

struct FileTarget {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

/// Log file that can be opened after the subscriber is installed.
/// Writes are dropped while nothing is open.
#[derive(Clone, Default)]
struct FileSink(Arc<Mutex<Option<FileTarget>>>);

impl FileSink {
    fn open(&self, path: &Path) -> Result<()> {
        let (dir, file_name) = split_log_path(path)?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name.to_string_lossy())
            .build(dir)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let mut slot = self.0.lock().map_err(|_| anyhow!("Log file lock poisoned"))?;
        *slot = Some(FileTarget {
            path: path.to_path_buf(),
            writer,
            _guard: guard,
        });
        Ok(())
    }

    fn is_open_at(&self, path: &Path) -> bool {
        self.0
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|t| t.path == path))
            .unwrap_or(false)
    }

    /// Flush and close the current file.
    fn close(&self) {
        if let Ok(mut slot) = self.0.lock() {
            slot.take();
        }
    }
}

impl io::Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        match slot.as_mut() {
            Some(target) => target.writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        match slot.as_mut() {
            Some(target) => target.writer.flush(),
            None => Ok(()),
        }
    }
}

/// Runtime switches of the installed subscriber.
///
/// Dropping the handle flushes and closes the log file.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    quiet_level: String,
    cli_verbose: bool,
    console_on: Arc<AtomicBool>,
    console_pinned: bool,
    file: FileSink,
    file_pinned: bool,
}

impl LogControl for LogHandle {
    fn set_verbose(&self, verbose: bool) {
        let level = level_for(self.cli_verbose || verbose, &self.quiet_level);
        if self.filter.reload(EnvFilter::new(level)).is_ok() {
            tracing::debug!(level, "Log level changed from shared flags");
        }
    }

    fn set_console(&self, console: bool) {
        if self.console_pinned {
            return;
        }
        self.console_on
            .store(console || self.cli_verbose, Ordering::Relaxed);
    }

    fn set_log_file(&self, path: &Path) {
        if self.file_pinned || self.file.is_open_at(path) {
            return;
        }
        match self.file.open(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Logging to file from shared flags"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot open log file"),
        }
    }
}

impl Drop for LogHandle {
    fn drop(&mut self) {
        self.file.close();
    }
}

/// Build the subscriber without installing it.
fn build(
    options: &LogOptions,
) -> Result<(impl tracing::Subscriber + Send + Sync + 'static, LogHandle)> {
    let level = level_for(options.verbose, &options.level);
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level directive '{}'", level))?;
    let (filter_layer, filter_handle) = reload::Layer::new(filter);

    let console_on = Arc::new(AtomicBool::new(options.console.unwrap_or(true)));
    let console_writer = {
        let console_on = Arc::clone(&console_on);
        io::stderr.with_filter(move |_: &tracing::Metadata<'_>| console_on.load(Ordering::Relaxed))
    };
    let console_layer = fmt::layer().with_writer(console_writer).with_target(false);

    let file = FileSink::default();
    if let Some(path) = &options.file {
        file.open(path)?;
    }
    let file_layer = fmt::layer()
        .with_writer({
            let file = file.clone();
            move || file.clone()
        })
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(file_layer);

    let handle = LogHandle {
        filter: filter_handle,
        quiet_level: options.level.clone(),
        cli_verbose: options.verbose,
        console_on,
        console_pinned: options.console.is_some(),
        file,
        file_pinned: options.file.is_some(),
    };
    Ok((subscriber, handle))
}

/// Install the global subscriber. Call once per process.
pub fn init(options: &LogOptions) -> Result<LogHandle> {
    let (subscriber, handle) = build(options)?;
    subscriber
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(handle)
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Log path has no file name: {}", path.display()))?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, file_name))
}
