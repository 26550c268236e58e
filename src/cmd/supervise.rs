//! Supervisor loop: `flagsync supervise -- <worker command>`.
//!
//! Publishes fresh flags with `started` set, runs the worker as a child
//! process and follows its progress through the shared file. Ctrl-C is
//! turned into `kill = true` so the worker can stop at its next poll.
//! The store is decommissioned on every exit path unless `--keep` is given.

use anyhow::{Context, Result, bail};
use console::style;
use flagsync::config::{ENV_SHM_DIR, SyncConfig};
use flagsync::flags::Flags;
use flagsync::ramdisk::Backing;
use flagsync::retry::ThreadSleeper;
use flagsync::session::FlagSession;
use flagsync::ui::FlagMonitor;
use flagsync::ui::icons::STOP;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Command;

pub async fn cmd_supervise(
    config: &SyncConfig,
    command: &[String],
    interval: Duration,
    keep: bool,
) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No worker command given")?;

    let mut session = tokio::task::block_in_place(|| {
        FlagSession::supervisor(
            config.backing_store(),
            &config.session_options(),
            ThreadSleeper,
            Flags::default(),
        )
    })
    .context("Failed to provision the shared flag store")?;

    let outcome = run_worker(config, &mut session, program, args, interval).await;

    if keep {
        println!(
            "Keeping flags at {}",
            style(session.path().display()).dim()
        );
    } else {
        let released = tokio::task::block_in_place(|| session.shutdown());
        if let Err(e) = released {
            // the worker's own failure is the more useful report
            if outcome.is_err() {
                tracing::error!(error = %e, "Failed to decommission the shared flag store");
            } else {
                return Err(e).context("Failed to decommission the shared flag store");
            }
        }
    }

    let status = outcome?;
    if !status.success() {
        bail!("Worker failed: {}", status);
    }
    Ok(())
}

/// Publish the start flags, run the worker to completion and report on it.
async fn run_worker(
    config: &SyncConfig,
    session: &mut FlagSession<ThreadSleeper>,
    program: &str,
    args: &[String],
    interval: Duration,
) -> Result<ExitStatus> {
    let start = Flags {
        started: true,
        cli: true,
        ..Flags::default()
    };
    tokio::task::block_in_place(|| session.publish(start))
        .context("Failed to publish initial flags")?;
    tracing::info!(path = %session.path().display(), "Published initial flags");

    let mut cmd = Command::new(program);
    cmd.args(args).kill_on_drop(true);
    // Point the worker at the same store when it is not the platform default.
    if let Backing::Builtin { dir } = config.backing() {
        cmd.env(ENV_SHM_DIR, dir);
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn worker '{}'", program))?;
    tracing::info!(pid = ?child.id(), program = %program, "Worker spawned");

    let mut monitor = FlagMonitor::new("supervise");
    monitor.update(session.flags());

    let mut ticker = tokio::time::interval(interval);
    let mut kill_sent = false;

    let status = loop {
        tokio::select! {
            status = child.wait() => {
                break status.context("Failed to wait for worker")?;
            }
            signal = tokio::signal::ctrl_c(), if !kill_sent => {
                signal.context("Failed to listen for Ctrl-C")?;
                kill_sent = true;
                monitor.print_line(format!("{}Ctrl-C received, asking the worker to stop", STOP));
                tokio::task::block_in_place(|| {
                    session.read();
                    session.flags_mut().kill = true;
                    session.write()
                })
                .context("Failed to publish stop request")?;
            }
            _ = ticker.tick() => {
                if tokio::task::block_in_place(|| session.poll()).is_fresh() {
                    monitor.update(session.flags());
                }
            }
        }
    };

    tokio::task::block_in_place(|| session.poll());
    monitor.finish(session.flags());
    println!("Worker exited with {}", status);
    Ok(status)
}
