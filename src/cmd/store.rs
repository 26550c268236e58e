//! Backing store commands: `flagsync path`, `flagsync mount`, `flagsync unmount`.

use anyhow::{Context, Result};
use flagsync::config::SyncConfig;
use flagsync::ramdisk::ProvisionOutcome;
use flagsync::retry::ThreadSleeper;

pub fn cmd_path(config: &SyncConfig) {
    println!("{}", config.backing_store().resolve_path().display());
}

pub fn cmd_mount(config: &SyncConfig) -> Result<()> {
    let store = config.backing_store();
    let outcome = store
        .provision(&ThreadSleeper)
        .context("Failed to provision the shared flag store")?;

    let dir = store.backing().dir().display();
    match outcome {
        ProvisionOutcome::Builtin => println!("{} is memory-backed already, nothing to mount", dir),
        ProvisionOutcome::AlreadyMounted => println!("RAM disk already mounted at {}", dir),
        ProvisionOutcome::Mounted => println!("Mounted RAM disk at {}", dir),
    }
    Ok(())
}

pub fn cmd_unmount(config: &SyncConfig) -> Result<()> {
    let store = config.backing_store();
    store
        .decommission()
        .context("Failed to decommission the shared flag store")?;
    println!("Released {}", store.backing().dir().display());
    Ok(())
}
