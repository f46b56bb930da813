use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use portable_pty::{ChildKiller, ExitStatus};
use ptymux_types::{validate_size, GroupId, PtyError, PtyId, PtyStatus, PtySummary, SpawnSpec};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::{ReaderHandle, StreamHub};
use super::pty_handler::{default_shell, PtyHandler};
use super::screen_buffer::{ScreenBuffer, Snapshot};
use super::{DEFAULT_READER_QUEUE, DEFAULT_SCROLLBACK_LINES};

/// How long output is still collected after the process has exited
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How long to wait for the process to die after SIGKILL
const FORCE_KILL_WAIT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8192;
const OUTPUT_CHANNEL: usize = 64;

/// Per-session knobs, shared by every session of a registry
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub scrollback_lines: usize,
    pub reader_queue_capacity: usize,
    /// Time between the polite signal and SIGKILL
    pub kill_grace: Duration,
    pub default_shell: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            reader_queue_capacity: DEFAULT_READER_QUEUE,
            kill_grace: Duration::from_secs(2),
            default_shell: default_shell(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Errors a pty master reports once the slave side has been closed
fn is_hangup(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EIO)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

fn exit_code(status: std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status.exit_code() as i32,
        Err(e) => {
            warn!("failed to wait for pty process: {}", e);
            -1
        }
    }
}

/// One live process attached to a pseudo-terminal, plus its screen state.
pub struct PtySession {
    id: PtyId,
    group: GroupId,
    command: String,
    args: Vec<String>,
    cwd: PathBuf,
    title: Option<String>,
    pid: Option<u32>,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    size: Mutex<(u16, u16)>,
    hub: Arc<StreamHub>,
    /// Master and writer; released once the process is gone
    io: Arc<Mutex<Option<PtyHandler>>>,
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    status: watch::Sender<PtyStatus>,
    kill_grace: Duration,
    killing: AtomicBool,
    /// Set as soon as the child is known to be gone, before `finish`
    child_gone: AtomicBool,
}

impl PtySession {
    /// Spawn the process and start pumping its output. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        group: &str,
        id: PtyId,
        spec: &SpawnSpec,
        config: &SessionConfig,
    ) -> Result<Arc<Self>, PtyError> {
        spec.validate()?;
        let spawned = PtyHandler::spawn(spec, &config.default_shell)?;

        let buffer = ScreenBuffer::with_scrollback(spec.cols, spec.rows, config.scrollback_lines);
        let (status, _) = watch::channel(PtyStatus::Starting);
        let now = Utc::now();

        let session = Arc::new(Self {
            id,
            group: group.to_string(),
            command: spawned.command,
            args: spec.args.clone(),
            cwd: spawned.cwd,
            title: spec.title.clone(),
            pid: spawned.pid,
            created_at: now,
            last_activity: Mutex::new(now),
            size: Mutex::new((spec.cols, spec.rows)),
            hub: StreamHub::new(buffer, config.reader_queue_capacity),
            io: Arc::new(Mutex::new(Some(spawned.handler))),
            killer: Mutex::new(Some(spawned.killer)),
            status,
            kill_grace: config.kill_grace,
            killing: AtomicBool::new(false),
            child_gone: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL);
        let reader = spawned.reader;
        tokio::task::spawn_blocking(move || read_loop(reader, tx));

        let mut child = spawned.child;
        let waiter = tokio::task::spawn_blocking(move || child.wait());

        session.status.send_replace(PtyStatus::Running);
        tokio::spawn(Arc::clone(&session).pump(rx, waiter));

        info!(
            group = %session.group,
            pty = %session.id,
            pid = ?session.pid,
            command = %session.command,
            "pty session started"
        );
        Ok(session)
    }

    /// Move output into the hub until the process has exited, then emit
    /// the exit event.
    async fn pump(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Bytes>,
        mut waiter: JoinHandle<std::io::Result<ExitStatus>>,
    ) {
        let code = loop {
            tokio::select! {
                biased;
                chunk = rx.recv() => match chunk {
                    Some(data) => self.on_output(data),
                    None => {
                        // Output closed first; the exit status follows shortly
                        self.child_gone.store(true, Ordering::SeqCst);
                        break match (&mut waiter).await {
                            Ok(status) => exit_code(status),
                            Err(e) => {
                                warn!(pty = %self.id, "exit waiter failed: {}", e);
                                -1
                            }
                        };
                    }
                },
                status = &mut waiter => {
                    self.child_gone.store(true, Ordering::SeqCst);
                    let code = match status {
                        Ok(status) => exit_code(status),
                        Err(e) => {
                            warn!(pty = %self.id, "exit waiter failed: {}", e);
                            -1
                        }
                    };
                    self.drain(&mut rx).await;
                    break code;
                }
            }
        };

        self.finish(code);
    }

    /// Collect whatever output is still in flight after exit. Background
    /// children may keep the pty open, so this is bounded.
    async fn drain(&self, rx: &mut mpsc::Receiver<Bytes>) {
        let deadline = tokio::time::sleep(EXIT_DRAIN_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                chunk = rx.recv() => match chunk {
                    Some(data) => self.on_output(data),
                    None => return,
                },
                _ = &mut deadline => return,
            }
        }
    }

    fn on_output(&self, data: Bytes) {
        self.hub.publish(data);
        self.touch();
    }

    fn finish(&self, code: i32) {
        lock(&self.io).take();
        lock(&self.killer).take();
        self.status.send_replace(PtyStatus::Exited(code));
        self.hub.close(code);
        info!(group = %self.group, pty = %self.id, code, "pty session exited");
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Utc::now();
    }

    fn ensure_alive(&self) -> Result<(), PtyError> {
        if self.is_exited() {
            return Err(PtyError::NotRunning(self.id.clone()));
        }
        Ok(())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Forward bytes to the process input.
    pub async fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        self.ensure_alive()?;

        let io = Arc::clone(&self.io);
        let data = data.to_vec();
        let id = self.id.clone();
        tokio::task::spawn_blocking(move || match lock(&io).as_mut() {
            Some(handler) => handler.write(&data),
            None => Err(PtyError::NotRunning(id)),
        })
        .await
        .map_err(|e| PtyError::Io(std::io::Error::other(e)))?
        .map_err(|e| self.input_error(e))?;

        self.touch();
        Ok(())
    }

    /// A write that fails because the process is gone is `NotRunning`,
    /// also in the window before its exit status has been collected.
    fn input_error(&self, err: PtyError) -> PtyError {
        match err {
            PtyError::Io(e) if self.child_gone.load(Ordering::SeqCst) || is_hangup(&e) => {
                debug!(pty = %self.id, "input after hangup: {}", e);
                PtyError::NotRunning(self.id.clone())
            }
            other => other,
        }
    }

    /// Resize the OS pty and the screen buffer.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        validate_size(cols, rows)?;
        self.ensure_alive()?;

        {
            let mut io = lock(&self.io);
            let handler = io
                .as_mut()
                .ok_or_else(|| PtyError::NotRunning(self.id.clone()))?;
            handler.resize(cols, rows)?;
        }
        self.hub.resize(cols, rows);
        *lock(&self.size) = (cols, rows);
        self.touch();

        debug!(pty = %self.id, cols, rows, "pty resized");
        Ok(())
    }

    /// Terminate the process: hang up its process group, then SIGKILL it
    /// if it is still alive after the grace period. Safe to call any number
    /// of times, including after exit.
    pub async fn kill(&self) {
        if self.is_exited() {
            return;
        }

        if !self.killing.swap(true, Ordering::SeqCst) {
            debug!(pty = %self.id, "terminating pty process");
            self.hang_up();
        }

        if tokio::time::timeout(self.kill_grace, self.wait_exit())
            .await
            .is_err()
        {
            warn!(pty = %self.id, "process outlived grace period, killing");
            self.force_kill();
            if tokio::time::timeout(FORCE_KILL_WAIT, self.wait_exit())
                .await
                .is_err()
            {
                warn!(pty = %self.id, "process did not exit after SIGKILL");
            }
        }
    }

    #[cfg(unix)]
    fn hang_up(&self) {
        match self.pid {
            Some(pid) => super::pty_handler::hang_up(pid),
            None => self.force_kill(),
        }
    }

    #[cfg(not(unix))]
    fn hang_up(&self) {
        self.force_kill();
    }

    fn force_kill(&self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                super::pty_handler::force_kill(pid);
            }
        }
        if let Some(killer) = lock(&self.killer).as_mut() {
            let _ = killer.kill();
        }
    }

    /// Resolve with the exit code once the process has exited.
    pub async fn wait_exit(&self) -> i32 {
        let mut rx = self.status.subscribe();
        let result = rx
            .wait_for(|status| matches!(status, PtyStatus::Exited(_)))
            .await
            .map(|status| status.exit_code());
        match result {
            Ok(Some(code)) => code,
            _ => -1,
        }
    }

    /// Subscribe to output: a snapshot first, then live data.
    pub fn attach(&self) -> ReaderHandle {
        self.hub.attach()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.hub.snapshot()
    }

    /// The stream hub holding this session's screen buffer
    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> PtyStatus {
        *self.status.borrow()
    }

    pub fn is_exited(&self) -> bool {
        matches!(self.status(), PtyStatus::Exited(_))
    }

    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *lock(&self.last_activity)
    }

    pub fn reader_count(&self) -> usize {
        self.hub.reader_count()
    }

    /// Requested title, else the last one the program set, else the command
    pub fn title(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.hub.title())
            .unwrap_or_else(|| self.command.clone())
    }

    pub fn info(&self) -> PtySummary {
        let status = self.status();
        let (cols, rows) = self.size();
        PtySummary {
            id: self.id.clone(),
            group: self.group.clone(),
            title: self.title(),
            command: self.command.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            cols,
            rows,
            status: status.as_str().to_string(),
            exit_code: status.exit_code(),
            readers: self.reader_count(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
        }
    }
}

/// Blocking read loop; ends on EOF, a read error or when the pump is gone.
fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Bytes>) {
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Bytes::copy_from_slice(&buffer[..n])).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO once the slave side is closed
            Err(_) => break,
        }
    }
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("group", &self.group)
            .field("id", &self.id)
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("status", &self.status())
            .finish()
    }
}
