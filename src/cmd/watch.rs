//! Progress follower: `flagsync watch`.

use anyhow::Result;
use flagsync::config::SyncConfig;
use flagsync::flags::RunStatus;
use flagsync::logging::LogHandle;
use flagsync::retry::ThreadSleeper;
use flagsync::session::FlagSession;
use flagsync::ui::FlagMonitor;
use std::time::Duration;

/// Poll the shared flags until the run finishes, a stop is requested, or
/// `max_polls` runs out.
pub async fn cmd_watch(
    config: &SyncConfig,
    log: &LogHandle,
    interval: Duration,
    max_polls: Option<u64>,
) -> Result<()> {
    // Attaching may sleep through the grace period and read retries.
    let mut session = tokio::task::block_in_place(|| {
        FlagSession::worker(
            config.backing_store(),
            &config.session_options(),
            ThreadSleeper,
            log,
        )
    });

    let mut monitor = FlagMonitor::new("watch");
    monitor.update(session.flags());

    let mut polls: u64 = 0;
    loop {
        let status = session.flags().status();
        if status.is_finished() || status == RunStatus::Stopping {
            break;
        }
        if max_polls.is_some_and(|max| polls >= max) {
            tracing::debug!(polls, "Poll limit reached");
            break;
        }

        tokio::time::sleep(interval).await;
        let outcome = tokio::task::block_in_place(|| session.poll());
        tracing::trace!(?outcome, "Polled shared flags");
        if outcome.is_fresh() {
            monitor.update(session.flags());
        }
        polls += 1;
    }

    monitor.finish(session.flags());
    Ok(())
}
