//! The `ptymux` binary's building blocks: command line, configuration,
//! logging setup and the subcommands themselves.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;

pub use cli::{Cli, Commands, LayoutCommands};
pub use config::AppConfig;
