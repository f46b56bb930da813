use std::io::{Read, Write};
use std::path::PathBuf;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use ptymux_types::{PtyError, SpawnSpec};
use tracing::debug;

/// Shell used when a spawn request names no command
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn io_error(e: impl std::fmt::Display) -> PtyError {
    PtyError::Io(std::io::Error::other(e.to_string()))
}

/// A freshly spawned process and the handles needed to drive it.
pub struct SpawnedPty {
    pub handler: PtyHandler,
    pub child: Box<dyn Child + Send + Sync>,
    pub killer: Box<dyn ChildKiller + Send + Sync>,
    pub reader: Box<dyn Read + Send>,
    pub command: String,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
}

/// Owns the master side of a pty: input and window size.
pub struct PtyHandler {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
}

impl PtyHandler {
    /// Open a pty and spawn `spec` on its slave side.
    pub fn spawn(spec: &SpawnSpec, shell: &str) -> Result<SpawnedPty, PtyError> {
        let command = spec.command.clone().unwrap_or_else(|| shell.to_string());
        let spawn_error = |reason: String| PtyError::Spawn {
            command: command.clone(),
            reason,
        };

        let cwd = match &spec.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        };
        if !cwd.is_dir() {
            return Err(spawn_error(format!(
                "working directory {} does not exist",
                cwd.display()
            )));
        }

        let pair = native_pty_system()
            .openpty(pty_size(spec.cols, spec.rows))
            .map_err(|e| spawn_error(format!("failed to open pty: {:#}", e)))?;

        let mut cmd = CommandBuilder::new(&command);
        cmd.args(&spec.args);
        cmd.cwd(&cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_error(format!("{:#}", e)))?;
        // Only the child may hold the slave, otherwise reads never see EOF
        drop(pair.slave);

        let master = pair.master;
        let reader = master
            .try_clone_reader()
            .map_err(|e| spawn_error(format!("failed to clone pty reader: {:#}", e)))?;
        let writer = master
            .take_writer()
            .map_err(|e| spawn_error(format!("failed to take pty writer: {:#}", e)))?;

        let pid = child.process_id();
        let killer = child.clone_killer();
        debug!(command = %command, ?pid, cwd = %cwd.display(), "spawned pty process");

        Ok(SpawnedPty {
            handler: PtyHandler { master, writer },
            child,
            killer,
            reader,
            command,
            cwd,
            pid,
        })
    }

    /// Write raw bytes to the process input
    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Resize the PTY
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master.resize(pty_size(cols, rows)).map_err(io_error)
    }
}

/// Ask the process group led by `pid` to exit: SIGHUP (what a closing
/// terminal sends, honoured by interactive shells) followed by SIGTERM.
#[cfg(unix)]
pub(crate) fn hang_up(pid: u32) {
    let group = -(pid as libc::pid_t);
    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe {
        libc::kill(group, libc::SIGHUP);
        libc::kill(group, libc::SIGTERM);
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
pub(crate) fn force_kill(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}
