use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use crate::config::AppConfig;

/// CLI arguments for ptymux
#[derive(Debug, Parser)]
#[command(name = "ptymux")]
#[command(about = "Persistent pty sessions over HTTP, and a terminal multiplexer")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to config file (default: <config dir>/ptymux/config.toml)
    #[arg(long, global = true, value_name = "PATH", env = "PTYMUX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Generate shell completions
    #[arg(long, value_enum)]
    pub generate: Option<Shell>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pty server
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,
        /// Scrollback lines kept per pty
        #[arg(long, value_name = "LINES")]
        scrollback: Option<usize>,
        /// Seconds an exited, unobserved pty is kept before eviction
        #[arg(long, value_name = "SECS")]
        idle_timeout: Option<u64>,
    },
    /// Tile ptys in this terminal
    Mux {
        /// Layout file (.toml or .json); one shell pane when omitted
        layout: Option<PathBuf>,
        /// Prefix chord for multiplexer commands, e.g. C-a
        #[arg(long, value_name = "CHORD")]
        prefix: Option<String>,
        /// Write logs to this file instead of the terminal
        #[arg(long, value_name = "PATH")]
        log_file: Option<PathBuf>,
    },
    /// Layout file tools
    Layout {
        #[command(subcommand)]
        command: LayoutCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum LayoutCommands {
    /// Validate a layout file and print the pane rectangles it produces
    Check {
        layout: PathBuf,
        /// Terminal width to lay out for
        #[arg(long, default_value_t = 80)]
        cols: u16,
        /// Terminal height to lay out for
        #[arg(long, default_value_t = 24)]
        rows: u16,
    },
}

impl Commands {
    /// Command line flags take precedence over file and environment
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        match self {
            Commands::Serve {
                bind,
                scrollback,
                idle_timeout,
            } => {
                if let Some(bind) = bind {
                    config.bind = *bind;
                }
                if let Some(lines) = scrollback {
                    config.scrollback_lines = *lines;
                }
                if let Some(secs) = idle_timeout {
                    config.idle_timeout_secs = *secs;
                }
            }
            Commands::Mux { prefix, .. } => {
                if let Some(prefix) = prefix {
                    config.mux.prefix = prefix.clone();
                }
            }
            Commands::Layout { .. } => {}
        }
    }
}
