//! Read/write/retry engine for the shared flag file.
//!
//! The flag file is a single-slot mailbox: every write replaces the whole
//! document, and readers poll it. There is no lock. Two policies keep the
//! protocol available instead:
//!
//! - a document that is not there yet is retried a bounded number of times,
//!   then the reader carries on with the flags it already has;
//! - a document that cannot be parsed (the writer was caught mid-write) is
//!   logged and replaced by the reader's previous in-memory copy.
//!
//! Writes are published through a temporary file and a rename, so on POSIX
//! filesystems a reader sees either the old or the new document. Only write
//! failures reach the caller.

use crate::errors::SyncError;
use crate::flags::Flags;
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// How a document reaches the backing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    /// Write a sibling temp file, then rename it over the flag file
    #[default]
    Atomic,
    /// Truncate and rewrite the flag file itself
    InPlace,
}

/// Which path a read took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete document was read and adopted
    Fresh,
    /// The document was incomplete; the previous copy was kept
    Torn,
    /// The document never appeared within the retry budget
    Missing { attempts: u32 },
    /// The file exists but could not be opened or read
    Unreadable,
}

impl ReadOutcome {
    pub fn is_fresh(&self) -> bool {
        matches!(self, ReadOutcome::Fresh)
    }
}

/// One process's view of the shared flags.
///
/// Holds the canonical in-memory document for the process. Reads replace it
/// when a complete document is available, writes publish it.
pub struct Synchronizer<S = ThreadSleeper> {
    path: PathBuf,
    policy: RetryPolicy,
    publish_mode: PublishMode,
    sleeper: S,
    flags: Flags,
}

impl Synchronizer<ThreadSleeper> {
    /// Synchronizer that sleeps on the real clock, starting from default flags.
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self::with_sleeper(path, policy, ThreadSleeper)
    }
}

impl<S: Sleeper> Synchronizer<S> {
    pub fn with_sleeper(path: impl Into<PathBuf>, policy: RetryPolicy, sleeper: S) -> Self {
        Self {
            path: path.into(),
            policy,
            publish_mode: PublishMode::default(),
            sleeper,
            flags: Flags::default(),
        }
    }

    /// Start from `flags` instead of the defaults.
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The canonical in-memory document.
    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Mutate the in-memory document. Peers see the change after the next write.
    pub fn flags_mut(&mut self) -> &mut Flags {
        &mut self.flags
    }

    pub fn into_flags(self) -> Flags {
        self.flags
    }

    /// Whether a document has been published at the backing path.
    pub fn is_published(&self) -> bool {
        self.path.is_file()
    }

    /// Publish the in-memory document, replacing whatever is at the path.
    pub fn write(&self) -> Result<(), SyncError> {
        let bytes = self.flags.encode()?;
        match self.publish_mode {
            PublishMode::Atomic => self.write_atomic(&bytes)?,
            PublishMode::InPlace => {
                std::fs::write(&self.path, &bytes).map_err(|source| SyncError::WriteFailed {
                    path: self.path.clone(),
                    source,
                })?
            }
        }
        debug!(path = %self.path.display(), bytes = bytes.len(), flags = ?self.flags, "Published flags");
        Ok(())
    }

    /// Replace the in-memory document with `flags` and publish it.
    pub fn publish(&mut self, flags: Flags) -> Result<(), SyncError> {
        self.flags = flags;
        self.write()
    }

    /// Absorb the latest published document and return the in-memory copy.
    ///
    /// Never fails: a missing or torn document leaves the previous copy in place.
    pub fn read(&mut self) -> &Flags {
        self.poll();
        &self.flags
    }

    /// Like [`Synchronizer::read`], reporting which path the read took.
    pub fn poll(&mut self) -> ReadOutcome {
        let attempts = self.policy.attempts();

        for attempt in 1..=attempts {
            let mut file = match File::open(&self.path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(attempt, attempts, path = %self.path.display(), "Flag file not published yet");
                    if attempt < attempts {
                        self.sleeper.sleep(self.policy.delay);
                    }
                    continue;
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Cannot open flags: reusing old");
                    return ReadOutcome::Unreadable;
                }
            };

            // give a writer that is mid-flight a moment to finish
            self.sleeper.sleep(self.policy.settle);

            let mut bytes = Vec::new();
            if let Err(e) = file.read_to_end(&mut bytes) {
                warn!(path = %self.path.display(), error = %e, "Cannot read flags: reusing old");
                return ReadOutcome::Unreadable;
            }

            return match Flags::decode(&bytes) {
                Ok(flags) => {
                    self.flags = flags;
                    debug!(flags = ?self.flags, "Read flags");
                    ReadOutcome::Fresh
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Flags busy: reusing old");
                    ReadOutcome::Torn
                }
            };
        }

        info!(
            attempts,
            path = %self.path.display(),
            "Flag file never appeared, keeping last known flags"
        );
        ReadOutcome::Missing { attempts }
    }

    /// Publish our document, then absorb whatever is there now.
    pub fn sync(&mut self) -> Result<&Flags, SyncError> {
        self.write()?;
        Ok(self.read())
    }

    fn write_atomic(&self, bytes: &[u8]) -> Result<(), SyncError> {
        let tmp_path = self.temp_path();
        let write_err = |source| SyncError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        let result = File::create(&tmp_path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| std::fs::rename(&tmp_path, &self.path));

        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Fresh temp file next to the flag file for every write, unique across
    /// processes (pid) and across writers inside one process (counter).
    fn temp_path(&self) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "flags".to_string());
        self.path
            .with_file_name(format!("{}.{}.{}.tmp", name, std::process::id(), seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const DELAY: Duration = Duration::from_millis(10);
    const SETTLE: Duration = Duration::from_millis(1);

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            delay: DELAY,
            settle: SETTLE,
        }
    }

    fn no_sleep(_: Duration) {}

    fn flag_path() -> (PathBuf, TempDir) {
        let dir = tempdir().unwrap();
        (dir.path().join(".flags.json"), dir)
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn test_round_trip() {
        let (path, _dir) = flag_path();
        let mut flags = Flags::default();
        flags.epoch = 7;
        flags.lr = 3.0e-4;
        flags.output_type = vec!["json".to_string(), "img".to_string()];

        let writer = Synchronizer::with_sleeper(&path, policy(), no_sleep).with_flags(flags.clone());
        writer.write().unwrap();

        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(reader.poll(), ReadOutcome::Fresh);
        assert_eq!(reader.flags(), &flags);
    }

    #[test]
    fn test_missing_file_keeps_prior_document_after_bounded_retries() {
        let (path, _dir) = flag_path();
        let pauses = RefCell::new(Vec::new());
        let mut prior = Flags::default();
        prior.progress = 0.3;

        let mut reader =
            Synchronizer::with_sleeper(&path, policy(), |d: Duration| pauses.borrow_mut().push(d))
                .with_flags(prior.clone());

        assert_eq!(reader.poll(), ReadOutcome::Missing { attempts: 10 });
        assert_eq!(reader.flags(), &prior);
        // one pause between each pair of attempts, none after the last
        assert_eq!(*pauses.borrow(), vec![DELAY; 9]);
    }

    #[test]
    fn test_torn_document_falls_back_and_warns() {
        let (path, _dir) = flag_path();
        let full = Flags::default().encode().unwrap();
        std::fs::write(&path, &full[..full.len() / 3]).unwrap();

        let mut prior = Flags::default();
        prior.started = true;
        prior.progress = 0.9;

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep).with_flags(prior.clone());
        let outcome = tracing::subscriber::with_default(subscriber, || reader.poll());

        assert_eq!(outcome, ReadOutcome::Torn);
        assert_eq!(reader.flags(), &prior);
        let output = logs.contents();
        assert!(output.contains("WARN"), "no warning logged: {}", output);
        assert!(output.contains("Flags busy"));
    }

    #[test]
    fn test_empty_document_is_torn() {
        let (path, _dir) = flag_path();
        std::fs::write(&path, b"").unwrap();
        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(reader.poll(), ReadOutcome::Torn);
        assert_eq!(reader.flags(), &Flags::default());
    }

    #[test]
    fn test_settle_pause_precedes_every_parse() {
        let (path, _dir) = flag_path();
        Synchronizer::with_sleeper(&path, policy(), no_sleep).write().unwrap();

        let pauses = RefCell::new(Vec::new());
        let mut reader =
            Synchronizer::with_sleeper(&path, policy(), |d: Duration| pauses.borrow_mut().push(d));
        reader.read();
        reader.read();
        assert_eq!(*pauses.borrow(), vec![SETTLE, SETTLE]);
    }

    #[test]
    fn test_last_writer_wins() {
        let (path, _dir) = flag_path();
        let mut d1 = Flags::default();
        d1.project_name = "first".to_string();
        let mut d2 = Flags::default();
        d2.project_name = "second".to_string();

        let mut a = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        let mut b = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        a.publish(d1).unwrap();
        b.publish(d2.clone()).unwrap();

        let mut c = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(c.read(), &d2);
        assert_eq!(a.read(), &d2);
    }

    #[test]
    fn test_cold_start_waits_for_supervisor() {
        let (path, _dir) = flag_path();
        let pauses = RefCell::new(Vec::new());
        let calls = Cell::new(0u32);

        // supervisor publishes during the worker's second retry pause
        let sleeper = |d: Duration| {
            pauses.borrow_mut().push(d);
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                Synchronizer::with_sleeper(&path, policy(), no_sleep)
                    .write()
                    .unwrap();
            }
        };

        let mut worker = Synchronizer::with_sleeper(&path, policy(), sleeper);
        worker.flags_mut().started = true;

        assert_eq!(worker.poll(), ReadOutcome::Fresh);
        assert!(!worker.flags().started);
        assert_eq!(*pauses.borrow(), vec![DELAY, DELAY, SETTLE]);
    }

    #[test]
    fn test_status_propagates_to_supervisor() {
        let (path, _dir) = flag_path();
        let mut supervisor = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        supervisor.write().unwrap();

        let mut worker = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        worker.read();
        worker.flags_mut().progress = 0.42;
        worker.write().unwrap();

        assert_eq!(supervisor.read().progress, 0.42);
    }

    #[test]
    fn test_stop_signal_reaches_worker() {
        let (path, _dir) = flag_path();
        let mut supervisor = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        let mut worker = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        supervisor.write().unwrap();
        assert!(!worker.read().kill);

        supervisor.flags_mut().kill = true;
        supervisor.write().unwrap();
        assert!(worker.read().kill);
    }

    #[test]
    fn test_sync_writes_then_reads() {
        let (path, _dir) = flag_path();
        let mut node = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        node.flags_mut().done = true;

        let flags = node.sync().unwrap().clone();
        assert!(flags.done);
        assert!(node.is_published());
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone").join(".flags.json");
        let node = Synchronizer::with_sleeper(&path, policy(), no_sleep);

        let err = node.write().unwrap_err();
        match &err {
            SyncError::WriteFailed { path: p, .. } => assert_eq!(p, &path),
            other => panic!("Expected WriteFailed, got {:?}", other),
        }
        assert!(err.is_fatal());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let (path, dir) = flag_path();
        let node = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        node.write().unwrap();
        node.write().unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![".flags.json".to_string()]);
    }

    #[test]
    fn test_temp_paths_differ_per_write() {
        let (path, _dir) = flag_path();
        let node = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        let first = node.temp_path();
        let second = node.temp_path();
        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
    }

    #[test]
    fn test_concurrent_writers_in_one_process() {
        let (path, dir) = flag_path();

        std::thread::scope(|scope| {
            for writer in 0..4u32 {
                let path = path.clone();
                scope.spawn(move || {
                    let mut node = Synchronizer::with_sleeper(&path, policy(), no_sleep);
                    for round in 0..25u32 {
                        node.flags_mut().epoch = writer * 100 + round;
                        node.write().unwrap();
                    }
                });
            }
        });

        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(reader.poll(), ReadOutcome::Fresh);
        assert_eq!(reader.flags().epoch % 100, 24);

        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_non_finite_write_fails_and_keeps_channel_readable() {
        let (path, _dir) = flag_path();
        let mut worker = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        worker.flags_mut().progress = 0.5;
        worker.write().unwrap();

        worker.flags_mut().progress = f64::NAN;
        worker.flags_mut().done = true;
        let err = worker.write().unwrap_err();
        assert!(matches!(err, SyncError::NonFiniteValue { ref field } if field == "progress"));

        worker.flags_mut().progress = f64::INFINITY;
        assert!(worker.write().is_err());

        let mut supervisor = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(supervisor.poll(), ReadOutcome::Fresh);
        assert_eq!(supervisor.flags().progress, 0.5);
        assert!(!supervisor.flags().done);

        worker.flags_mut().progress = 1.0;
        worker.write().unwrap();
        assert!(supervisor.read().done);
    }

    #[test]
    fn test_in_place_mode_overwrites() {
        let (path, _dir) = flag_path();
        let mut node = Synchronizer::with_sleeper(&path, policy(), no_sleep)
            .with_publish_mode(PublishMode::InPlace);
        node.write().unwrap();
        node.flags_mut().keep = 3;
        node.write().unwrap();

        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        assert_eq!(reader.read().keep, 3);
    }

    #[test]
    fn test_forward_compatible_document() {
        let (path, _dir) = flag_path();
        std::fs::write(&path, br#"{"kill": true, "added_later": [1, 2, 3]}"#).unwrap();

        let mut reader = Synchronizer::with_sleeper(&path, policy(), no_sleep);
        let flags = reader.read();
        assert!(flags.kill);
        assert_eq!(flags.batch, 16);
    }
}
