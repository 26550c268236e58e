//! Configuration for flagsync.
//!
//! Settings come from `flagsync.toml` and can be overridden by environment
//! variables and then by command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! dir = "/dev/shm"                  # force a built-in memory-backed directory
//! file_name = ".flags.json"
//! mount_point = "/Volumes/RAMDisk"  # macOS RAM disk
//! helper = "./libs/scripts/RAMDisk"
//!
//! [retry]
//! max_attempts = 10
//! delay_ms = 100
//! settle_ms = 100
//! grace_ms = 1000
//! atomic_publish = true
//!
//! [logging]
//! file = "./data/logs/flow.log"     # unset: the `log` path in the shared flags
//! level = "info"
//! console = true                    # unset: follow the `cli` flag
//! ```
//!
//! # Environment
//!
//! | Variable                | Overrides              |
//! |-------------------------|------------------------|
//! | `FLAGSYNC_SHM_DIR`      | `store.dir`            |
//! | `FLAGSYNC_MAX_ATTEMPTS` | `retry.max_attempts`   |
//! | `FLAGSYNC_DELAY_MS`     | `retry.delay_ms`       |
//! | `FLAGSYNC_LOG`          | `logging.level`        |

use crate::logging::LogOptions;
use crate::ramdisk::{Backing, BackingStore, FLAG_FILE_NAME};
use crate::retry::RetryPolicy;
use crate::session::SessionOptions;
use crate::sync::PublishMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "flagsync.toml";

pub const ENV_SHM_DIR: &str = "FLAGSYNC_SHM_DIR";
pub const ENV_MAX_ATTEMPTS: &str = "FLAGSYNC_MAX_ATTEMPTS";
pub const ENV_DELAY_MS: &str = "FLAGSYNC_DELAY_MS";
pub const ENV_LOG: &str = "FLAGSYNC_LOG";

/// Where the flag file lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Built-in memory-backed directory; disables RAM disk mounting when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Name of the flag file inside the store
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// RAM disk mount point on platforms that need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,
    /// Helper invoked with `mount` / `unmount`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper: Option<PathBuf>,
}

fn default_file_name() -> String {
    FLAG_FILE_NAME.to_string()
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            dir: None,
            file_name: default_file_name(),
            mount_point: None,
            helper: None,
        }
    }
}

/// Read retry and publication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    /// Open attempts while the flag file is missing
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Pause before each parse, in milliseconds
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Worker's one-off startup pause, in milliseconds
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Publish through temp file + rename
    #[serde(default = "default_atomic_publish")]
    pub atomic_publish: bool,
}

fn default_max_attempts() -> u32 {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    100
}

fn default_grace_ms() -> u64 {
    1000
}

fn default_atomic_publish() -> bool {
    true
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            settle_ms: default_settle_ms(),
            grace_ms: default_grace_ms(),
            atomic_publish: default_atomic_publish(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Append log lines to this file; when unset, workers use the `log` flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Level directive when not verbose
    #[serde(default = "default_level")]
    pub level: String,
    /// Mirror log lines to stderr; when unset, workers follow the `cli` flag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console: Option<bool>,
}

fn default_level() -> String {
    crate::logging::QUIET_LEVEL.to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            file: None,
            level: default_level(),
            console: None,
        }
    }
}

/// The complete flagsync.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagsyncToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl FlagsyncToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse flagsync.toml")
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize flagsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.store.file_name.is_empty() {
            warnings.push("store.file_name is empty".to_string());
        } else if self.store.file_name.contains(['/', '\\']) {
            warnings.push(format!(
                "store.file_name '{}' should be a bare file name, not a path",
                self.store.file_name
            ));
        }

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts is 0; reads will still try once".to_string());
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging.level '{}': expected a level such as 'info' or 'debug'",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Effective configuration: flagsync.toml, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Where the configuration was (or would be) loaded from
    pub config_path: PathBuf,
    /// Parsed flagsync.toml
    pub toml: FlagsyncToml,
    /// CLI override for the built-in store directory
    pub cli_shm_dir: Option<PathBuf>,
    /// CLI override: start logging at debug level
    pub verbose: bool,
}

impl SyncConfig {
    /// Load configuration. An explicitly named file must exist; the default
    /// `flagsync.toml` is optional.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let toml = match &config_path {
            Some(path) => FlagsyncToml::load(path)?,
            None => FlagsyncToml::load_or_default(Path::new(CONFIG_FILE_NAME))?,
        };
        Ok(Self {
            config_path: config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME)),
            toml,
            cli_shm_dir: None,
            verbose: false,
        })
    }

    /// Create SyncConfig with CLI overrides.
    pub fn with_cli_args(
        config_path: Option<PathBuf>,
        shm_dir: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self> {
        let mut config = Self::new(config_path)?;
        config.cli_shm_dir = shm_dir;
        config.verbose = verbose;
        Ok(config)
    }

    /// Built-in store directory, if one is forced (CLI → env → file).
    pub fn shm_dir(&self) -> Option<PathBuf> {
        self.shm_dir_with(&env_lookup)
    }

    fn shm_dir_with(&self, env: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
        self.cli_shm_dir
            .clone()
            .or_else(|| env(ENV_SHM_DIR).filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(|| self.toml.store.dir.clone())
    }

    /// Backing for the flag file on this platform, with overrides applied.
    pub fn backing(&self) -> Backing {
        self.backing_with(&env_lookup)
    }

    fn backing_with(&self, env: &dyn Fn(&str) -> Option<String>) -> Backing {
        if let Some(dir) = self.shm_dir_with(env) {
            return Backing::Builtin { dir };
        }
        match Backing::detect() {
            Backing::Mounted {
                mount_point,
                helper,
            } => Backing::Mounted {
                mount_point: self.toml.store.mount_point.clone().unwrap_or(mount_point),
                helper: self.toml.store.helper.clone().unwrap_or(helper),
            },
            builtin => builtin,
        }
    }

    /// Backing store ready for a session.
    pub fn backing_store(&self) -> BackingStore {
        BackingStore::new(self.backing())
            .with_file_name(self.toml.store.file_name.clone())
            .with_settle(self.retry_policy().delay)
    }

    /// Read retry policy (env can override file).
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy_with(&env_lookup)
    }

    fn retry_policy_with(&self, env: &dyn Fn(&str) -> Option<String>) -> RetryPolicy {
        let retry = &self.toml.retry;
        let max_attempts = env(ENV_MAX_ATTEMPTS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(retry.max_attempts);
        let delay_ms = env(ENV_DELAY_MS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(retry.delay_ms);
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
            settle: Duration::from_millis(retry.settle_ms),
        }
    }

    /// Options shared by supervisor and worker sessions.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            retry: self.retry_policy(),
            grace: Duration::from_millis(self.toml.retry.grace_ms),
            publish_mode: if self.toml.retry.atomic_publish {
                PublishMode::Atomic
            } else {
                PublishMode::InPlace
            },
        }
    }

    /// Logging options (CLI verbose → env level → file).
    pub fn log_options(&self) -> LogOptions {
        self.log_options_with(&env_lookup)
    }

    fn log_options_with(&self, env: &dyn Fn(&str) -> Option<String>) -> LogOptions {
        let logging = &self.toml.logging;
        LogOptions {
            console: logging.console,
            file: logging.file.clone(),
            level: env(ENV_LOG)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| logging.level.clone()),
            verbose: self.verbose,
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
