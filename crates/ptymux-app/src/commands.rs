use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use ptymux_mux::{parse_prefix, render::pane_inner, Layout, MuxOptions};
use ptymux_server::{WebServer, WebServerConfig};
use ratatui::layout::Rect;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;

/// Run the pty server until Ctrl-c.
pub async fn serve(config: &AppConfig) -> Result<()> {
    info!("Starting ptymux server v{}", env!("CARGO_PKG_VERSION"));
    let server = WebServer::new(WebServerConfig {
        bind_addr: config.bind,
        registry: config.registry_config(),
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("shutdown signal received");
        signal.cancel();
    });

    server.start(shutdown).await
}

pub fn load_layout(path: Option<&Path>) -> Result<Layout> {
    match path {
        Some(path) => Layout::load(path)
            .with_context(|| format!("Failed to load layout {}", path.display())),
        None => Ok(Layout::default_shell()),
    }
}

/// Run the multiplexer in this terminal.
pub async fn mux(config: &AppConfig, layout: Option<&Path>) -> Result<()> {
    let layout = load_layout(layout)?;
    let options = MuxOptions {
        prefix: parse_prefix(&config.mux.prefix)?,
        interrupt_window: Duration::from_millis(config.mux.double_interrupt_ms),
        registry: config.registry_config(),
    };
    ptymux_mux::run(layout, options).await
}

/// One line per pane: index, title, outer rectangle and pty size.
pub fn layout_report(layout: &Layout, cols: u16, rows: u16) -> String {
    let focus = layout.initial_focus();
    let mut report = String::new();

    for (index, (pane, rect)) in layout
        .panes()
        .into_iter()
        .zip(layout.pane_rects(Rect::new(0, 0, cols, rows)))
        .enumerate()
    {
        let inner = pane_inner(rect);
        let _ = writeln!(
            report,
            "pane {:<3} {:<24} x={:<4} y={:<4} {}x{} (pty {}x{}){}",
            index + 1,
            pane.display_title(),
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            inner.width,
            inner.height,
            if focus == Some(index) { " focus" } else { "" },
        );
    }
    report
}

/// Validate a layout file and print where its panes land.
pub fn check_layout(path: &Path, cols: u16, rows: u16) -> Result<()> {
    let layout = load_layout(Some(path))?;
    print!("{}", layout_report(&layout, cols, rows));
    Ok(())
}
