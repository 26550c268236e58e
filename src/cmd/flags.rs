//! Flag document commands: `flagsync init|reset|show|get|set`.
//!
//! `init` and `reset` act as the supervisor; `show`, `get` and `set` attach
//! as a worker, so they wait for published flags and never touch the mount.

use anyhow::{Context, Result, anyhow};
use console::style;
use flagsync::config::SyncConfig;
use flagsync::flags::Flags;
use flagsync::logging::LogHandle;
use flagsync::retry::ThreadSleeper;
use flagsync::session::FlagSession;
use serde_json::Value;

fn attach_worker(config: &SyncConfig, log: &LogHandle) -> FlagSession<ThreadSleeper> {
    FlagSession::worker(
        config.backing_store(),
        &config.session_options(),
        ThreadSleeper,
        log,
    )
}

pub fn cmd_init(config: &SyncConfig, force: bool) -> Result<()> {
    let mut session = FlagSession::supervisor(
        config.backing_store(),
        &config.session_options(),
        ThreadSleeper,
        Flags::default(),
    )
    .context("Failed to provision the shared flag store")?;

    if session.is_published() && !force {
        println!(
            "Flags already published at {}",
            session.path().display()
        );
        println!("Use 'flagsync reset' or 'flagsync init --force' to overwrite them.");
        return Ok(());
    }

    session.write().context("Failed to publish default flags")?;
    println!(
        "{} default flags to {}",
        style("Published").green(),
        session.path().display()
    );
    Ok(())
}

pub fn cmd_show(config: &SyncConfig, log: &LogHandle, json: bool) -> Result<()> {
    let mut session = attach_worker(config, log);
    let flags = session.read();

    if json {
        let doc = serde_json::to_string_pretty(flags).context("Failed to serialize flags")?;
        println!("{}", doc);
        return Ok(());
    }

    println!();
    println!("Shared flags ({})", flags.status());
    println!("============");
    for name in Flags::field_names() {
        let value = flags.get(&name)?;
        println!("  {} = {}", name, value);
    }
    println!();
    Ok(())
}

pub fn cmd_get(config: &SyncConfig, log: &LogHandle, field: &str) -> Result<()> {
    let mut session = attach_worker(config, log);
    let value = session.read().get(field)?;
    println!("{}", render_value(&value));
    Ok(())
}

pub fn cmd_set(config: &SyncConfig, log: &LogHandle, assignments: &[String]) -> Result<()> {
    let parsed = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<Result<Vec<_>>>()?;

    let mut session = attach_worker(config, log);
    session.read();
    for (field, raw) in &parsed {
        session.flags_mut().set_from_str(field, raw)?;
    }
    session.write().context("Failed to publish flags")?;

    for (field, _) in &parsed {
        let value = session.flags().get(field)?;
        println!("Set {} = {}", style(field).cyan(), value);
    }
    Ok(())
}

/// Split `field=value`. The value may itself contain `=`.
fn parse_assignment(assignment: &str) -> Result<(&str, &str)> {
    let (field, value) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected FIELD=VALUE, got '{}'", assignment))?;
    let field = field.trim();
    if field.is_empty() {
        anyhow::bail!("Missing field name in '{}'", assignment);
    }
    Ok((field, value))
}

/// Strings print bare so shell scripts can use them directly.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
