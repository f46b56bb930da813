//! Key routing
//!
//! Keys go straight to the focused pane unless they follow the prefix
//! chord, in which case the one key after it is a multiplexer command.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use thiserror::Error;

/// Window in which a second Ctrl-c exits the multiplexer
pub const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
#[error("invalid prefix key '{0}': expected a chord like C-b, ^a or M-space")]
pub struct PrefixParseError(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    PassThrough,
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NextPane,
    PrevPane,
    ToggleHelp,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the focused pane
    Forward(Vec<u8>),
    Command(Command),
    Ignore,
}

/// Parse a prefix chord: `C-b`, `ctrl-b`, `^B`, `M-a`, `alt-space`.
pub fn parse_prefix(spec: &str) -> Result<KeyEvent, PrefixParseError> {
    let invalid = || PrefixParseError(spec.to_string());
    let trimmed = spec.trim();

    let (modifiers, key) = if let Some(rest) = trimmed.strip_prefix('^') {
        (KeyModifiers::CONTROL, rest)
    } else if let Some((modifier, rest)) = trimmed.split_once('-').filter(|(_, rest)| !rest.is_empty()) {
        let modifiers = match modifier.to_ascii_lowercase().as_str() {
            "c" | "ctrl" | "control" => KeyModifiers::CONTROL,
            "m" | "alt" | "meta" => KeyModifiers::ALT,
            _ => return Err(invalid()),
        };
        (modifiers, rest)
    } else {
        return Err(invalid());
    };

    let code = match key.to_ascii_lowercase().as_str() {
        "space" => KeyCode::Char(' '),
        single if single.chars().count() == 1 => {
            let c = single.chars().next().ok_or_else(invalid)?;
            KeyCode::Char(c)
        }
        _ => return Err(invalid()),
    };

    Ok(KeyEvent::new(code, modifiers))
}

/// Bytes a terminal would send for `key`, or `None` for keys that have no
/// byte encoding.
pub fn encode_key(key: &KeyEvent) -> Option<Vec<u8>> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    let mut bytes = match key.code {
        KeyCode::Char(c) if ctrl => vec![control_byte(c)?],
        KeyCode::Char(c) => c.to_string().into_bytes(),
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => b"\x1b[Z".to_vec(),
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],
        KeyCode::Null => vec![0],
        KeyCode::Up => b"\x1b[A".to_vec(),
        KeyCode::Down => b"\x1b[B".to_vec(),
        KeyCode::Right => b"\x1b[C".to_vec(),
        KeyCode::Left => b"\x1b[D".to_vec(),
        KeyCode::Home => b"\x1b[H".to_vec(),
        KeyCode::End => b"\x1b[F".to_vec(),
        KeyCode::PageUp => b"\x1b[5~".to_vec(),
        KeyCode::PageDown => b"\x1b[6~".to_vec(),
        KeyCode::Insert => b"\x1b[2~".to_vec(),
        KeyCode::Delete => b"\x1b[3~".to_vec(),
        KeyCode::F(n) => function_key(n)?.as_bytes().to_vec(),
        _ => return None,
    };

    if alt {
        bytes.insert(0, 0x1b);
    }
    Some(bytes)
}

fn control_byte(c: char) -> Option<u8> {
    match c.to_ascii_uppercase() {
        upper @ 'A'..='Z' => Some(upper as u8 - b'A' + 1),
        '@' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1b),
        '\\' | '4' => Some(0x1c),
        ']' | '5' => Some(0x1d),
        '^' | '6' => Some(0x1e),
        '_' | '-' | '7' => Some(0x1f),
        '?' | '8' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Option<&'static str> {
    let seq = match n {
        1 => "\x1bOP",
        2 => "\x1bOQ",
        3 => "\x1bOR",
        4 => "\x1bOS",
        5 => "\x1b[15~",
        6 => "\x1b[17~",
        7 => "\x1b[18~",
        8 => "\x1b[19~",
        9 => "\x1b[20~",
        10 => "\x1b[21~",
        11 => "\x1b[23~",
        12 => "\x1b[24~",
        _ => return None,
    };
    Some(seq)
}

/// Human readable form of a chord, for the help screen
pub fn describe_key(key: &KeyEvent) -> String {
    let name = match key.code {
        KeyCode::Char(' ') => "space".to_string(),
        KeyCode::Char(c) => c.to_string(),
        other => format!("{:?}", other),
    };
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        format!("C-{}", name)
    } else if key.modifiers.contains(KeyModifiers::ALT) {
        format!("M-{}", name)
    } else {
        name
    }
}

fn same_chord(a: &KeyEvent, b: &KeyEvent) -> bool {
    let normalize = |code: KeyCode| match code {
        KeyCode::Char(c) => KeyCode::Char(c.to_ascii_lowercase()),
        other => other,
    };
    normalize(a.code) == normalize(b.code)
        && a.modifiers.difference(KeyModifiers::SHIFT) == b.modifiers.difference(KeyModifiers::SHIFT)
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && matches!(key.code, KeyCode::Char('c' | 'C'))
}

/// Two-mode key state machine. The mode is the only state besides the time
/// of the last Ctrl-c; what a key does depends on nothing else.
#[derive(Debug, Clone)]
pub struct KeyRouter {
    mode: Mode,
    prefix: KeyEvent,
    interrupt_window: Duration,
    last_interrupt: Option<Instant>,
}

impl Default for KeyRouter {
    fn default() -> Self {
        Self::new(
            KeyEvent::new(KeyCode::Char('b'), KeyModifiers::CONTROL),
            DOUBLE_INTERRUPT_WINDOW,
        )
    }
}

impl KeyRouter {
    pub fn new(prefix: KeyEvent, interrupt_window: Duration) -> Self {
        Self {
            mode: Mode::PassThrough,
            prefix,
            interrupt_window,
            last_interrupt: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn prefix(&self) -> &KeyEvent {
        &self.prefix
    }

    pub fn route(&mut self, key: KeyEvent, now: Instant) -> Action {
        if key.kind == KeyEventKind::Release {
            return Action::Ignore;
        }

        if is_interrupt(&key) {
            let repeated = self
                .last_interrupt
                .is_some_and(|last| now.saturating_duration_since(last) <= self.interrupt_window);
            if repeated {
                self.last_interrupt = None;
                self.mode = Mode::PassThrough;
                return Action::Command(Command::Exit);
            }
            self.last_interrupt = Some(now);
        } else {
            self.last_interrupt = None;
        }

        match self.mode {
            Mode::PassThrough if same_chord(&key, &self.prefix) => {
                self.mode = Mode::Prefix;
                Action::Ignore
            }
            Mode::PassThrough => encode_key(&key).map_or(Action::Ignore, Action::Forward),
            Mode::Prefix => {
                self.mode = Mode::PassThrough;
                self.command(&key)
            }
        }
    }

    fn command(&self, key: &KeyEvent) -> Action {
        if same_chord(key, &self.prefix) {
            return encode_key(&self.prefix).map_or(Action::Ignore, Action::Forward);
        }
        if key.modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) {
            return Action::Ignore;
        }
        match key.code {
            KeyCode::Char('n') | KeyCode::Right | KeyCode::Tab => Action::Command(Command::NextPane),
            KeyCode::Char('p') | KeyCode::Left => Action::Command(Command::PrevPane),
            KeyCode::Char('?') => Action::Command(Command::ToggleHelp),
            KeyCode::Char('q') => Action::Command(Command::Exit),
            _ => Action::Ignore,
        }
    }
}
