use thiserror::Error;

use crate::{GroupId, PtyId};

/// Errors surfaced by pty operations. Malformed terminal output is never an
/// error; the emulator skips what it cannot interpret.
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("pty '{pty}' not found in session '{group}'")]
    NotFound { group: GroupId, pty: PtyId },

    #[error("pty '{0}' is not running")]
    NotRunning(PtyId),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("pty i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl PtyError {
    pub fn not_found(group: &str, pty: &str) -> Self {
        PtyError::NotFound {
            group: group.to_string(),
            pty: pty.to_string(),
        }
    }

    /// Short machine-readable kind, used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            PtyError::Spawn { .. } => "spawn_failed",
            PtyError::NotFound { .. } => "not_found",
            PtyError::NotRunning(_) => "not_running",
            PtyError::Validation(_) => "validation",
            PtyError::Io(_) => "io",
        }
    }
}
