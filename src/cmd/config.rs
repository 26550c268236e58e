//! Configuration view and validation commands: `flagsync config`.

use anyhow::Result;
use flagsync::config::{FlagsyncToml, SyncConfig};
use flagsync::logging::level_for;
use flagsync::ramdisk::Backing;

use super::super::ConfigCommands;

pub fn cmd_config(config: &SyncConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Flagsync Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No flagsync.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            println!("[store]");
            if let Some(dir) = &toml.store.dir {
                println!("  dir = \"{}\"", dir.display());
            }
            println!("  file_name = \"{}\"", toml.store.file_name);
            if let Some(mount_point) = &toml.store.mount_point {
                println!("  mount_point = \"{}\"", mount_point.display());
            }
            if let Some(helper) = &toml.store.helper {
                println!("  helper = \"{}\"", helper.display());
            }
            println!();

            println!("[retry]");
            println!("  max_attempts = {}", toml.retry.max_attempts);
            println!("  delay_ms = {}", toml.retry.delay_ms);
            println!("  settle_ms = {}", toml.retry.settle_ms);
            println!("  grace_ms = {}", toml.retry.grace_ms);
            println!("  atomic_publish = {}", toml.retry.atomic_publish);
            println!();

            println!("[logging]");
            match &toml.logging.file {
                Some(file) => println!("  file = \"{}\"", file.display()),
                None => println!("  # file follows the `log` flag"),
            }
            println!("  level = \"{}\"", toml.logging.level);
            match toml.logging.console {
                Some(console) => println!("  console = {}", console),
                None => println!("  # console follows the `cli` flag"),
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            match config.backing() {
                Backing::Builtin { dir } => {
                    println!("  backing = builtin ({})", dir.display());
                }
                Backing::Mounted {
                    mount_point,
                    helper,
                } => {
                    println!(
                        "  backing = ramdisk ({} via {})",
                        mount_point.display(),
                        helper.display()
                    );
                }
            }
            println!("  flag_file = {}", config.backing_store().resolve_path().display());
            let policy = config.retry_policy();
            println!("  max_attempts = {}", policy.max_attempts);
            println!("  delay = {:?}", policy.delay);
            println!("  worst_case_read = {:?}", policy.worst_case_wait());
            let log = config.log_options();
            println!("  log_level = \"{}\"", level_for(log.verbose, &log.level));
            println!();

            if !config_path.exists() {
                println!("Run 'flagsync config init' to create a flagsync.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No flagsync.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("flagsync.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            FlagsyncToml::default().save(config_path)?;

            println!("Created flagsync.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [store] dir, file_name, mount_point, helper");
            println!("  - [retry] max_attempts, delay_ms, settle_ms, grace_ms");
            println!("  - [logging] file, level, console");
            println!();
        }
    }

    Ok(())
}
