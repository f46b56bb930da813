use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use ptymux_terminal::{
    default_shell, RegistryConfig, SessionConfig, DEFAULT_READER_QUEUE, DEFAULT_SCROLLBACK_LINES,
    MAX_CONCURRENT_SESSIONS,
};
use serde::{Deserialize, Serialize};

/// Loopback only; the server has no authentication
pub const DEFAULT_BIND: &str = "127.0.0.1:4097";

/// Environment overrides, applied after the config file
pub const ENV_BIND: &str = "PTYMUX_BIND";
pub const ENV_SCROLLBACK: &str = "PTYMUX_SCROLLBACK";
pub const ENV_IDLE_TIMEOUT: &str = "PTYMUX_IDLE_TIMEOUT";

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4097))
}

/// Multiplexer settings (`[mux]` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MuxConfig {
    /// Prefix chord, e.g. `C-b`
    pub prefix: String,
    pub double_interrupt_ms: u64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            prefix: "C-b".to_string(),
            double_interrupt_ms: 1000,
        }
    }
}

/// Settings shared by `serve` and `mux`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub scrollback_lines: usize,
    pub sweep_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub kill_grace_ms: u64,
    pub reader_queue_capacity: usize,
    pub max_sessions: usize,
    /// Shell for ptys created without a command; `$SHELL` when unset
    pub default_shell: Option<String>,
    pub mux: MuxConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            sweep_interval_secs: 30,
            idle_timeout_secs: 300,
            kill_grace_ms: 2000,
            reader_queue_capacity: DEFAULT_READER_QUEUE,
            max_sessions: MAX_CONCURRENT_SESSIONS,
            default_shell: None,
            mux: MuxConfig::default(),
        }
    }
}

/// `<config dir>/ptymux/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ptymux").join("config.toml"))
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the config file, then the process environment.
    ///
    /// `explicit` comes from `--config` or `$PTYMUX_CONFIG` and must exist;
    /// the default location is only read if present.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| default_config_path().filter(|path| path.exists()));

        let mut config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PTYMUX_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind = bind
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_BIND, bind))?;
        }
        if let Some(lines) = lookup(ENV_SCROLLBACK) {
            self.scrollback_lines = lines
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_SCROLLBACK, lines))?;
        }
        if let Some(secs) = lookup(ENV_IDLE_TIMEOUT) {
            self.idle_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_IDLE_TIMEOUT, secs))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            bail!("sweep_interval_secs must be at least 1");
        }
        if self.reader_queue_capacity == 0 {
            bail!("reader_queue_capacity must be at least 1");
        }
        if self.max_sessions == 0 {
            bail!("max_sessions must be at least 1");
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            session: SessionConfig {
                scrollback_lines: self.scrollback_lines,
                reader_queue_capacity: self.reader_queue_capacity,
                kill_grace: Duration::from_millis(self.kill_grace_ms),
                default_shell: self.default_shell.clone().unwrap_or_else(default_shell),
            },
            max_sessions: self.max_sessions,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}
