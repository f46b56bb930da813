#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ptymux_mux::{Child, Direction, Layout, Mux, MuxOptions, Node, PaneSpec, SizeSpec, Split};
use ptymux_terminal::{PtyRegistry, RegistryConfig, SessionConfig};
use ratatui::layout::Rect;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn test_options() -> MuxOptions {
    MuxOptions {
        registry: RegistryConfig {
            session: SessionConfig {
                scrollback_lines: 500,
                reader_queue_capacity: 1024,
                kill_grace: Duration::from_millis(300),
                default_shell: "sh".to_string(),
            },
            max_sessions: 8,
            ..RegistryConfig::default()
        },
        ..MuxOptions::default()
    }
}

/// Interactive `sh` with a fixed prompt
pub fn shell_pane() -> PaneSpec {
    PaneSpec {
        command: Some("sh".to_string()),
        env: HashMap::from([
            ("PS1".to_string(), "$ ".to_string()),
            ("ENV".to_string(), String::new()),
        ]),
        ..PaneSpec::default()
    }
}

/// `sh -c script`
pub fn script_pane(script: &str) -> PaneSpec {
    PaneSpec {
        command: Some("sh".to_string()),
        args: vec!["-c".to_string(), script.to_string()],
        ..PaneSpec::default()
    }
}

pub fn split(direction: Direction, panes: Vec<(SizeSpec, PaneSpec)>) -> Layout {
    Layout::new(Node::Split(Split {
        direction,
        children: panes
            .into_iter()
            .map(|(size, pane)| Child {
                size,
                node: Node::Pane(pane),
            })
            .collect(),
    }))
}

pub async fn start(layout: Layout) -> (Mux, Arc<PtyRegistry>) {
    let options = test_options();
    let registry = Arc::new(PtyRegistry::new(options.registry.clone()));
    let mux = Mux::start(layout, Rect::new(0, 0, 80, 24), Arc::clone(&registry), &options)
        .await
        .expect("mux should start");
    (mux, registry)
}

/// Feed pane output into the mux until `done` holds.
pub async fn pump_until(mux: &mut Mux, mut done: impl FnMut(&Mux) -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !done(mux) {
        match tokio::time::timeout_at(deadline, mux.next_output()).await {
            Ok(Some((pane, event))) => mux.handle_output(pane, event),
            Ok(None) => panic!("every pane stream ended first"),
            Err(_) => panic!("timed out pumping pane output"),
        }
    }
}

pub fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

pub fn ctrl(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
}

/// Type `text` into the focused pane, `\n` as Enter.
pub async fn type_text(mux: &mut Mux, text: &str) {
    for c in text.chars() {
        let code = match c {
            '\n' => KeyCode::Enter,
            c => KeyCode::Char(c),
        };
        mux.handle_key(key(code), Instant::now()).await;
    }
}

pub async fn wait_for_text(mux: &Mux, pane: usize, needle: &str) -> String {
    let session = mux.panes()[pane].session();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let text = session.snapshot().text;
        if text.contains(needle) {
            return text;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {:?} in pane {}, screen was:\n{}", needle, pane, text);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
