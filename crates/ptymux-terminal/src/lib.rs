// Pseudo-terminal session core
//
// Spawns processes on real ptys, keeps each one's rendered terminal state
// (screen and scrollback) independent of any client, and fans its output
// out to any number of readers.

mod broadcast;
mod manager;
mod pty_handler;
mod screen_buffer;
mod session;

// Re-export public API
pub use broadcast::{ReaderHandle, StreamHub};
pub use manager::{PtyRegistry, RegistryConfig};
pub use pty_handler::default_shell;
pub use screen_buffer::{ScreenBuffer, ScreenCapture, Snapshot};
pub use session::{PtySession, SessionConfig};

// Constants
pub const MAX_CONCURRENT_SESSIONS: usize = 64;
pub const DEFAULT_SCROLLBACK_LINES: usize = 10_000;
pub const DEFAULT_READER_QUEUE: usize = 1024;
