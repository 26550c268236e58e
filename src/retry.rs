//! Bounded retry with a fixed delay.
//!
//! The synchronizer never sleeps directly; it asks a [`Sleeper`]. Production
//! code uses [`ThreadSleeper`], tests pass a closure that records the pauses
//! (and can make the document appear mid-retry) without waiting on the clock.

use std::time::Duration;

/// Attempts allowed while the flag file has not been published yet.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Pause between attempts, and after mounting the RAM disk.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Pause before every deserialization so a concurrent writer can finish.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

/// How long `read()` keeps trying and how long it waits in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Open attempts while the document is absent; zero is treated as one
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Delay before each deserialization
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl RetryPolicy {
    /// Number of attempts actually made, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Longest time a read can spend waiting for a missing document.
    pub fn worst_case_wait(&self) -> Duration {
        self.delay * self.attempts().saturating_sub(1) + self.settle
    }
}

/// Something that can pause the current thread.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Real sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

impl<F> Sleeper for F
where
    F: Fn(Duration),
{
    fn sleep(&self, duration: Duration) {
        self(duration)
    }
}
