use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::{
    cursor,
    event::{Event, EventStream, KeyEvent},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use ptymux_terminal::{PtyRegistry, PtySession, RegistryConfig};
use ptymux_types::StreamEvent;
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use tracing::{debug, info, warn};

use crate::focus::FocusRing;
use crate::keys::{Action, Command, KeyRouter, DOUBLE_INTERRUPT_WINDOW};
use crate::layout::{Layout, PaneSpec};
use crate::render::{self, pane_inner};

/// Registry group every pane is created in
pub const MUX_GROUP: &str = "mux";

/// Minimum time between two redraws while output is streaming in
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct MuxOptions {
    pub prefix: KeyEvent,
    pub interrupt_window: Duration,
    pub registry: RegistryConfig,
}

impl Default for MuxOptions {
    fn default() -> Self {
        Self {
            prefix: *KeyRouter::default().prefix(),
            interrupt_window: DOUBLE_INTERRUPT_WINDOW,
            registry: RegistryConfig::default(),
        }
    }
}

/// A pane's process and what became of it.
#[derive(Debug)]
pub struct Pane {
    spec: PaneSpec,
    session: Arc<PtySession>,
    exit_code: Option<i32>,
}

impl Pane {
    pub fn spec(&self) -> &PaneSpec {
        &self.spec
    }

    pub fn session(&self) -> &Arc<PtySession> {
        &self.session
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_exited(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Layout title, else whatever the program set through OSC
    pub fn title(&self) -> String {
        if self.spec.title.is_some() {
            return self.spec.display_title();
        }
        self.session
            .hub()
            .title()
            .unwrap_or_else(|| self.spec.display_title())
    }
}

/// Output events of every pane, tagged with the pane index. `None` marks
/// the end of one pane's reader.
type PaneEvents = BoxStream<'static, (usize, Option<StreamEvent>)>;

fn pane_events(index: usize, session: &PtySession) -> PaneEvents {
    session
        .attach()
        .map(Some)
        .chain(stream::once(async { None }))
        .map(move |event| (index, event))
        .boxed()
}

/// Multiplexer state: panes, their rectangles, focus and key mode.
///
/// Everything here reacts to discrete events; the layout is recomputed on
/// terminal resize only.
pub struct Mux {
    layout: Layout,
    registry: Arc<PtyRegistry>,
    panes: Vec<Pane>,
    rects: Vec<Rect>,
    focus: FocusRing,
    router: KeyRouter,
    show_help: bool,
    quit: bool,
    events: SelectAll<PaneEvents>,
}

impl Mux {
    /// Spawn one pty per pane, sized to its place in `area`.
    pub async fn start(
        layout: Layout,
        area: Rect,
        registry: Arc<PtyRegistry>,
        options: &MuxOptions,
    ) -> Result<Self> {
        let rects = layout.pane_rects(area);
        let mut panes = Vec::with_capacity(rects.len());
        let mut events = SelectAll::new();

        for (index, (spec, rect)) in layout.panes().into_iter().zip(&rects).enumerate() {
            let inner = pane_inner(*rect);
            let created = registry
                .create(MUX_GROUP, spec.to_spawn_spec(inner.width, inner.height))
                .await;
            let session = match created {
                Ok(session) => session,
                Err(e) => {
                    registry.shutdown().await;
                    return Err(e).with_context(|| {
                        format!("Failed to start pane {} ({})", index + 1, spec.display_title())
                    });
                }
            };

            info!(pane = index, pty = %session.id(), title = %spec.display_title(), "pane started");
            events.push(pane_events(index, &session));
            panes.push(Pane {
                spec: spec.clone(),
                session,
                exit_code: None,
            });
        }

        let focus = FocusRing::new(panes.len(), layout.initial_focus());
        Ok(Self {
            layout,
            registry,
            panes,
            rects,
            focus,
            router: KeyRouter::new(options.prefix, options.interrupt_window),
            show_help: false,
            quit: false,
            events,
        })
    }

    pub fn panes(&self) -> &[Pane] {
        &self.panes
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn focused(&self) -> Option<usize> {
        self.focus.focused()
    }

    pub fn show_help(&self) -> bool {
        self.show_help
    }

    pub fn prefix(&self) -> &KeyEvent {
        self.router.prefix()
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// Next output event from any pane
    pub async fn next_output(&mut self) -> Option<(usize, Option<StreamEvent>)> {
        self.events.next().await
    }

    pub async fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::Key(key) => self.handle_key(key, now).await,
            Event::Paste(text) => self.forward(text.as_bytes()).await,
            Event::Resize(width, height) => self.resize(width, height),
            _ => {}
        }
    }

    pub async fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        match self.router.route(key, now) {
            Action::Forward(bytes) => self.forward(&bytes).await,
            Action::Command(command) => self.run_command(command),
            Action::Ignore => {}
        }
    }

    fn run_command(&mut self, command: Command) {
        debug!(?command, "multiplexer command");
        match command {
            Command::NextPane => self.focus.next(),
            Command::PrevPane => self.focus.prev(),
            Command::ToggleHelp => self.show_help = !self.show_help,
            Command::Exit => {
                info!("exit requested");
                self.quit = true;
            }
        }
    }

    async fn forward(&self, data: &[u8]) {
        let Some(pane) = self.focus.focused().and_then(|index| self.panes.get(index)) else {
            return;
        };
        // An exit event for the pane is already on its way
        if let Err(e) = pane.session.write(data).await {
            debug!(pty = %pane.session.id(), "input dropped: {}", e);
        }
    }

    pub fn handle_output(&mut self, index: usize, event: Option<StreamEvent>) {
        match event {
            Some(StreamEvent::Exit { code }) => self.pane_exited(index, code),
            Some(_) => {}
            None => {
                let Some(pane) = self.panes.get(index) else {
                    return;
                };
                if let Some(code) = pane.session.status().exit_code() {
                    self.pane_exited(index, code);
                } else {
                    warn!(pane = index, "pane reader fell behind, reattaching");
                    let events = pane_events(index, &pane.session);
                    self.events.push(events);
                }
            }
        }
    }

    fn pane_exited(&mut self, index: usize, code: i32) {
        let Some(pane) = self.panes.get_mut(index) else {
            return;
        };
        if pane.exit_code.is_some() {
            return;
        }
        pane.exit_code = Some(code);
        self.focus.mark_exited(index);
        info!(pane = index, code, "pane exited");

        if self.focus.all_exited() {
            info!("all panes exited");
            self.quit = true;
        }
    }

    /// Recompute the layout for a new terminal size and resize every live
    /// pane to its new inner area.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.rects = self.layout.pane_rects(Rect::new(0, 0, width, height));

        for (pane, rect) in self.panes.iter().zip(&self.rects) {
            if pane.is_exited() {
                continue;
            }
            let inner = pane_inner(*rect);
            if let Err(e) = pane
                .session
                .resize(inner.width.max(1), inner.height.max(1))
            {
                debug!(pty = %pane.session.id(), "resize skipped: {}", e);
            }
        }
    }

    /// Kill whatever is still running.
    pub async fn shutdown(self) {
        self.registry.shutdown().await;
    }
}

/// Runs `restore` when dropped.
struct TerminalGuard<F: FnMut()> {
    restore: F,
}

impl<F: FnMut()> Drop for TerminalGuard<F> {
    fn drop(&mut self) {
        (self.restore)();
    }
}

/// Arm `restore` first, then run `enter`. A failing `enter` undoes
/// whatever part of it already took effect.
fn take_over<F: FnMut()>(
    restore: F,
    enter: impl FnOnce() -> io::Result<()>,
) -> Result<TerminalGuard<F>> {
    let guard = TerminalGuard { restore };
    enter().context("Failed to set up terminal")?;
    Ok(guard)
}

fn restore_terminal() {
    if let Err(e) = disable_raw_mode() {
        warn!("failed to disable raw mode: {}", e);
    }
    if let Err(e) = execute!(io::stdout(), LeaveAlternateScreen, cursor::Show) {
        warn!("failed to restore terminal: {}", e);
    }
}

/// Take over the terminal and run `layout` until the user quits or every
/// pane has exited.
pub async fn run(layout: Layout, options: MuxOptions) -> Result<()> {
    let registry = Arc::new(PtyRegistry::new(options.registry.clone()));

    // ── Terminal setup ──────────────────────────────────────────────

    let _guard = take_over(restore_terminal, || {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)
    })?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend).context("Failed to create terminal")?;

    let run_result = event_loop(&mut terminal, layout, Arc::clone(&registry), &options).await;
    registry.shutdown().await;

    run_result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    layout: Layout,
    registry: Arc<PtyRegistry>,
    options: &MuxOptions,
) -> Result<()> {
    let size = terminal.size().context("Failed to read terminal size")?;
    let area = Rect::new(0, 0, size.width, size.height);
    let mut mux = Mux::start(layout, area, registry, options).await?;

    let mut input = EventStream::new();
    let mut frame = tokio::time::interval(FRAME_INTERVAL);
    frame.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut dirty = true;

    while !mux.should_quit() {
        tokio::select! {
            _ = frame.tick(), if dirty => {
                terminal
                    .draw(|frame| render::draw(frame, &mux))
                    .context("Failed to draw")?;
                dirty = false;
            }
            event = input.next() => match event {
                Some(Ok(event)) => {
                    mux.handle_event(event, Instant::now()).await;
                    dirty = true;
                }
                Some(Err(e)) => return Err(e).context("Failed to read terminal event"),
                None => break,
            },
            Some((pane, event)) = mux.next_output() => {
                mux.handle_output(pane, event);
                dirty = true;
            }
        }
    }

    Ok(())
}
