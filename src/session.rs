//! Supervisor and worker sessions over the shared flag file.
//!
//! Both roles share the same [`Synchronizer`]; they differ only in how they
//! start and stop:
//!
//! | Role       | Startup                                               | Shutdown           |
//! |------------|-------------------------------------------------------|--------------------|
//! | Supervisor | provision the store, hold the initial flags           | decommission store |
//! | Worker     | check the file, grace pause, read, follow log flags   | nothing            |
//!
//! Every synchronization cycle is driven by the caller.

use crate::errors::SyncError;
use crate::flags::Flags;
use crate::logging::LogControl;
use crate::ramdisk::BackingStore;
use crate::retry::{RetryPolicy, Sleeper};
use crate::sync::{PublishMode, ReadOutcome, Synchronizer};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// One-off pause a worker takes when the flag file is not there at startup.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

/// Which side of the protocol a process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the backing store and usually publishes first
    Supervisor,
    /// Waits for the supervisor's flags and reports status back
    Worker,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Supervisor => write!(f, "supervisor"),
            Role::Worker => write!(f, "worker"),
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Ready,
    Synchronizing,
    Idle,
    Terminated,
}

/// Tunables shared by both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub grace: Duration,
    pub publish_mode: PublishMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            grace: DEFAULT_GRACE,
            publish_mode: PublishMode::default(),
        }
    }
}

/// A process's attachment to the shared flags.
pub struct FlagSession<S: Sleeper> {
    role: Role,
    state: SessionState,
    store: BackingStore,
    sync: Synchronizer<S>,
}

impl<S: Sleeper> FlagSession<S> {
    /// Start as supervisor: provision the store and hold `initial` for publishing.
    ///
    /// Provisioning failure is fatal; without the store there is no channel.
    pub fn supervisor(
        store: BackingStore,
        options: &SessionOptions,
        sleeper: S,
        initial: Flags,
    ) -> Result<Self, SyncError> {
        let path = store.resolve_path();
        debug!(path = %path.display(), state = ?SessionState::Initializing, "Starting supervisor session");

        let outcome = store.provision(&sleeper)?;
        debug!(?outcome, "Backing store ready");

        let sync = Synchronizer::with_sleeper(path, options.retry, sleeper)
            .with_publish_mode(options.publish_mode)
            .with_flags(initial);

        Ok(Self {
            role: Role::Supervisor,
            state: SessionState::Ready,
            store,
            sync,
        })
    }

    /// Start as worker: wait briefly for the supervisor, absorb its flags and
    /// adopt the log settings they carry (`verbalise`, `cli`, `log`).
    ///
    /// Never provisions the store.
    pub fn worker(
        store: BackingStore,
        options: &SessionOptions,
        sleeper: S,
        log: &dyn LogControl,
    ) -> Self {
        let path = store.resolve_path();
        debug!(path = %path.display(), state = ?SessionState::Initializing, "Starting worker session");

        if !path.is_file() {
            debug!(grace = ?options.grace, "Flags not published yet, pausing once");
            sleeper.sleep(options.grace);
        }

        let mut sync = Synchronizer::with_sleeper(path, options.retry, sleeper)
            .with_publish_mode(options.publish_mode);
        let outcome = sync.poll();
        log.follow(sync.flags());
        info!(?outcome, verbose = sync.flags().verbalise, "Worker attached to shared flags");

        Self {
            role: Role::Worker,
            state: SessionState::Ready,
            store,
            sync,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn path(&self) -> &Path {
        self.sync.path()
    }

    pub fn flags(&self) -> &Flags {
        self.sync.flags()
    }

    pub fn flags_mut(&mut self) -> &mut Flags {
        self.sync.flags_mut()
    }

    /// Whether a document has been published yet.
    pub fn is_published(&self) -> bool {
        self.sync.is_published()
    }

    pub fn read(&mut self) -> &Flags {
        self.poll();
        self.sync.flags()
    }

    pub fn poll(&mut self) -> ReadOutcome {
        self.state = SessionState::Synchronizing;
        let outcome = self.sync.poll();
        self.state = SessionState::Idle;
        outcome
    }

    pub fn write(&mut self) -> Result<(), SyncError> {
        self.state = SessionState::Synchronizing;
        let result = self.sync.write();
        self.state = SessionState::Idle;
        result
    }

    pub fn sync(&mut self) -> Result<&Flags, SyncError> {
        self.state = SessionState::Synchronizing;
        let result = self.sync.write();
        self.state = SessionState::Idle;
        result?;
        Ok(self.read())
    }

    /// Replace the in-memory flags and publish them.
    pub fn publish(&mut self, flags: Flags) -> Result<(), SyncError> {
        self.state = SessionState::Synchronizing;
        let result = self.sync.publish(flags);
        self.state = SessionState::Idle;
        result
    }

    /// End the session. A supervisor decommissions the store; a worker leaves
    /// the flag file for the supervisor's final read.
    pub fn shutdown(mut self) -> Result<Flags, SyncError> {
        if self.role == Role::Supervisor {
            self.store.decommission()?;
            info!(path = %self.sync.path().display(), "Backing store decommissioned");
        }
        self.state = SessionState::Terminated;
        debug!(role = %self.role, state = ?self.state, "Session closed");
        Ok(self.sync.into_flags())
    }
}
