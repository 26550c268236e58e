//! Memory-backed storage for the flag file.
//!
//! Linux ships a RAM-backed filesystem at `/dev/shm`, so nothing needs to be
//! mounted there. macOS has no such directory; the supervisor creates a RAM
//! disk at `/Volumes/RAMDisk` with an external helper script and removes it
//! again on shutdown.
//!
//! Only the supervisor provisions or decommissions the store. Workers just
//! read and write the flag file inside it.

use crate::errors::SyncError;
use crate::retry::{DEFAULT_DELAY, Sleeper};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// Well-known name of the flag file inside the store.
pub const FLAG_FILE_NAME: &str = ".flags.json";

/// Built-in RAM-backed directory on Linux.
pub const SHM_DIR: &str = "/dev/shm";

/// Mount point of the provisioned RAM disk on macOS.
pub const RAMDISK_MOUNT_POINT: &str = "/Volumes/RAMDisk";

/// Helper invoked as `<helper> mount` / `<helper> unmount`.
pub const RAMDISK_HELPER: &str = "./libs/scripts/RAMDisk";

/// Where the flag file lives and whether it has to be mounted first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    /// A directory that is already memory-backed
    Builtin { dir: PathBuf },
    /// A RAM disk created on demand by `helper`
    Mounted { mount_point: PathBuf, helper: PathBuf },
}

impl Backing {
    /// Pick the backing for the current platform.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Backing::Mounted {
                mount_point: PathBuf::from(RAMDISK_MOUNT_POINT),
                helper: PathBuf::from(RAMDISK_HELPER),
            }
        } else {
            Backing::Builtin {
                dir: PathBuf::from(SHM_DIR),
            }
        }
    }

    /// Directory holding the flag file.
    pub fn dir(&self) -> &Path {
        match self {
            Backing::Builtin { dir } => dir,
            Backing::Mounted { mount_point, .. } => mount_point,
        }
    }
}

/// What `provision()` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Store is built in, nothing to mount
    Builtin,
    /// Mount point already present
    AlreadyMounted,
    /// Helper mounted the RAM disk
    Mounted,
}

/// Owns the lifecycle of the memory-backed store and resolves the flag path.
#[derive(Debug, Clone)]
pub struct BackingStore {
    backing: Backing,
    file_name: String,
    settle: Duration,
}

impl BackingStore {
    pub fn new(backing: Backing) -> Self {
        Self {
            backing,
            file_name: FLAG_FILE_NAME.to_string(),
            settle: DEFAULT_DELAY,
        }
    }

    /// Store for the current platform with the default file name.
    pub fn detect() -> Self {
        Self::new(Backing::detect())
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Pause after a successful mount so the OS can finish attaching the disk.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Path of the flag file. Pure function of the configured backing.
    pub fn resolve_path(&self) -> PathBuf {
        self.backing.dir().join(&self.file_name)
    }

    /// Make sure the store exists. Safe to call repeatedly.
    pub fn provision(&self, sleeper: &impl Sleeper) -> Result<ProvisionOutcome, SyncError> {
        match &self.backing {
            Backing::Builtin { dir } => {
                debug!(dir = %dir.display(), "Using built-in memory-backed store");
                Ok(ProvisionOutcome::Builtin)
            }
            Backing::Mounted {
                mount_point,
                helper,
            } => {
                if mount_point.is_dir() {
                    debug!(mount_point = %mount_point.display(), "RAM disk already mounted");
                    return Ok(ProvisionOutcome::AlreadyMounted);
                }
                run_helper(helper, "mount")?;
                sleeper.sleep(self.settle);
                info!(mount_point = %mount_point.display(), "RAM disk mounted");
                Ok(ProvisionOutcome::Mounted)
            }
        }
    }

    /// Undo `provision()`. For a built-in store this removes the flag file.
    pub fn decommission(&self) -> Result<(), SyncError> {
        match &self.backing {
            Backing::Builtin { .. } => {
                let path = self.resolve_path();
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "Removed flag file");
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(source) => Err(SyncError::DecommissionFailed { path, source }),
                }
            }
            Backing::Mounted { helper, .. } => run_helper(helper, "unmount"),
        }
    }
}

/// Run the RAM disk helper, forwarding its stdout to info and stderr to debug.
fn run_helper(helper: &Path, action: &str) -> Result<(), SyncError> {
    let output = Command::new(helper)
        .arg(action)
        .output()
        .map_err(|source| SyncError::HelperSpawn {
            helper: helper.to_path_buf(),
            source,
        })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        info!("{}", line);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!("{}", stderr.trim_end());
    }

    if output.status.success() {
        Ok(())
    } else {
        Err(SyncError::ProvisionFailed {
            helper: helper.to_path_buf(),
            action: action.to_string(),
            status: output.status.to_string(),
        })
    }
}
