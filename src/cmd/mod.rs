//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                     | Role       |
//! |-------------|--------------------------------------|------------|
//! | `store`     | `Path`, `Mount`, `Unmount`           | supervisor |
//! | `flags`     | `Init`, `Reset`, `Show`, `Get`, `Set`| both       |
//! | `watch`     | `Watch`                              | worker     |
//! | `supervise` | `Supervise`                          | supervisor |
//! | `config`    | `Config`                             | -          |

pub mod config;
pub mod flags;
pub mod store;
pub mod supervise;
pub mod watch;

pub use config::cmd_config;
pub use flags::{cmd_get, cmd_init, cmd_set, cmd_show};
pub use store::{cmd_mount, cmd_path, cmd_unmount};
pub use supervise::cmd_supervise;
pub use watch::cmd_watch;
