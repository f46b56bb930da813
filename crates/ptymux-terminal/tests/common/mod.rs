#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ptymux_terminal::{PtyRegistry, PtySession, ReaderHandle, RegistryConfig, SessionConfig};
use ptymux_types::{SpawnSpec, StreamEvent};

pub const WAIT: Duration = Duration::from_secs(10);

/// Registry tuned for tests: `sh` as the shell and a short kill grace
pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        session: SessionConfig {
            scrollback_lines: 1000,
            reader_queue_capacity: 256,
            kill_grace: Duration::from_millis(300),
            default_shell: "sh".to_string(),
        },
        max_sessions: 8,
        sweep_interval: Duration::from_millis(50),
        idle_timeout: Duration::from_secs(300),
    }
}

pub fn test_registry() -> Arc<PtyRegistry> {
    Arc::new(PtyRegistry::new(test_config()))
}

/// Interactive `sh` with a fixed prompt
pub fn shell() -> SpawnSpec {
    SpawnSpec::default().with_env("PS1", "$ ").with_env("ENV", "")
}

/// `sh -c script`
pub fn script(script: &str) -> SpawnSpec {
    SpawnSpec::command("sh").with_args(["-c", script])
}

/// Poll the session snapshot until its text contains `needle`.
pub async fn wait_for_text(session: &PtySession, needle: &str) -> String {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let text = session.snapshot().text;
        if text.contains(needle) {
            return text;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {:?}, screen was:\n{}", needle, text);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub async fn next_event(reader: &mut ReaderHandle) -> Option<StreamEvent> {
    tokio::time::timeout(WAIT, reader.recv())
        .await
        .expect("timed out waiting for stream event")
}

/// Read data events until their concatenation contains `needle`.
pub async fn wait_for_data(reader: &mut ReaderHandle, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        match next_event(reader).await {
            Some(StreamEvent::Data(data)) => seen.push_str(&String::from_utf8_lossy(&data)),
            Some(other) => panic!("unexpected event {:?} while waiting for {:?}", other, needle),
            None => panic!("stream ended while waiting for {:?}, saw {:?}", needle, seen),
        }
    }
    seen
}

/// Drain a reader to the end of its stream.
pub async fn collect_events(reader: &mut ReaderHandle) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = next_event(reader).await {
        events.push(event);
    }
    events
}
