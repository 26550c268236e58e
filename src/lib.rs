pub mod config;
pub mod errors;
pub mod flags;
pub mod logging;
pub mod ramdisk;
pub mod retry;
pub mod session;
pub mod sync;
pub mod ui;

pub use errors::SyncError;
pub use flags::{Flags, RunStatus};
pub use ramdisk::{Backing, BackingStore};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use session::{FlagSession, Role, SessionOptions, SessionState};
pub use sync::{PublishMode, ReadOutcome, Synchronizer};
