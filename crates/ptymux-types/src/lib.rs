//! Core types shared by the ptymux crates
//!
//! Identifiers, spawn parameters, session status, the stream event feed and
//! the error taxonomy used by the terminal core and the HTTP surface.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub mod collab;
mod error;

pub use error::PtyError;

// ============================================================================
// Constants
// ============================================================================

/// Default terminal width for new ptys
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height for new ptys
pub const DEFAULT_ROWS: u16 = 24;

/// Upper bound accepted for either terminal dimension
pub const MAX_DIMENSION: u16 = 1000;

// ============================================================================
// Identifiers
// ============================================================================

/// Session-group identifier. Groups related ptys (one per workspace).
pub type GroupId = String;

/// Pty identifier, unique within its group.
pub type PtyId = String;

// ============================================================================
// Spawn parameters
// ============================================================================

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

/// Everything needed to launch one pty process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnSpec {
    /// Program to run; the configured shell when absent
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides applied on top of the server's environment
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
    #[serde(default)]
    pub title: Option<String>,
}

impl Default for SpawnSpec {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            title: None,
        }
    }
}

impl SpawnSpec {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Reject dimensions the terminal emulator cannot represent.
    pub fn validate(&self) -> Result<(), PtyError> {
        validate_size(self.cols, self.rows)?;
        if matches!(self.command.as_deref(), Some(c) if c.trim().is_empty()) {
            return Err(PtyError::Validation("command must not be empty".into()));
        }
        Ok(())
    }
}

/// Check a (cols, rows) pair before it reaches the pty or the emulator.
pub fn validate_size(cols: u16, rows: u16) -> Result<(), PtyError> {
    if cols == 0 || rows == 0 {
        return Err(PtyError::Validation(format!(
            "terminal size must be non-zero (got {}x{})",
            cols, rows
        )));
    }
    if cols > MAX_DIMENSION || rows > MAX_DIMENSION {
        return Err(PtyError::Validation(format!(
            "terminal size {}x{} exceeds {}",
            cols, rows, MAX_DIMENSION
        )));
    }
    Ok(())
}

// ============================================================================
// Session status
// ============================================================================

/// Lifecycle of a pty: `Starting -> Running -> Exited`. `Exited` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyStatus {
    Starting,
    Running,
    Exited(i32),
}

impl PtyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PtyStatus::Starting => "starting",
            PtyStatus::Running => "running",
            PtyStatus::Exited(_) => "exited",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PtyStatus::Running)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            PtyStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for PtyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyStatus::Exited(code) => write!(f, "exited({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One row of `list`: what a client needs to know about a live pty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtySummary {
    pub id: PtyId,
    pub group: GroupId,
    pub title: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub readers: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// ============================================================================
// Stream events
// ============================================================================

/// What a stream reader receives. The first event is always `Snapshot`;
/// `Exit` is last when it appears.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full rendered terminal state at attach time (ANSI formatted)
    Snapshot(String),
    /// Raw output bytes, exactly as read from the pty
    Data(Bytes),
    Exit { code: i32 },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Snapshot(_) => "snapshot",
            StreamEvent::Data(_) => "data",
            StreamEvent::Exit { .. } => "exit",
        }
    }
}
