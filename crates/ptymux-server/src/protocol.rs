use ptymux_terminal::Snapshot;
use ptymux_types::StreamEvent;
use serde::{Deserialize, Serialize};

/// POST .../input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub data: String,
}

/// POST .../resize
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

/// GET .../snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// ANSI formatted screen and scrollback
    pub data: String,
    /// Same content as plain text
    pub text: String,
    pub cols: u16,
    pub rows: u16,
    pub cursor: CursorPosition,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CursorPosition {
    pub row: u16,
    pub col: u16,
}

impl From<Snapshot> for SnapshotResponse {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            data: snapshot.ansi,
            text: snapshot.text,
            cols: snapshot.cols,
            rows: snapshot.rows,
            cursor: CursorPosition {
                row: snapshot.cursor.0,
                col: snapshot.cursor.1,
            },
        }
    }
}

/// One stream event as sent to a client, over SSE or a websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Incremental UTF-8 decoding of raw pty output. An incomplete character at
/// the end of a chunk is held back until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Whatever is still held back, replaced lossily.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Turns one reader's stream events into wire events. Keep one per
/// connection.
#[derive(Debug, Default)]
pub struct EventEncoder {
    decoder: Utf8Decoder,
}

impl EventEncoder {
    pub fn encode(&mut self, event: StreamEvent) -> WireEvent {
        let kind = event.name().to_string();
        match event {
            StreamEvent::Snapshot(ansi) => WireEvent {
                kind,
                data: ansi,
                exit_code: None,
            },
            StreamEvent::Data(bytes) => WireEvent {
                kind,
                data: self.decoder.decode(&bytes),
                exit_code: None,
            },
            StreamEvent::Exit { code } => WireEvent {
                kind,
                data: self.decoder.finish(),
                exit_code: Some(code),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    #[test]
    fn split_multibyte_character_is_carried_over() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "a✓b".as_bytes();

        assert_eq!(decoder.decode(&bytes[..2]), "a");
        assert_eq!(decoder.decode(&bytes[2..4]), "✓");
        assert_eq!(decoder.decode(&bytes[4..]), "b");
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"ok\xffgo"), "ok\u{FFFD}go");
    }

    #[test]
    fn finish_flushes_a_dangling_prefix() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&[b'x', 0xe2, 0x9c]), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.decode(b"y"), "y");
    }

    #[test]
    fn exit_event_serializes_exit_code() {
        let mut encoder = EventEncoder::default();
        let wire = encoder.encode(StreamEvent::Exit { code: 2 });

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "exit", "data": "", "exitCode": 2 })
        );
    }

    #[test]
    fn data_events_omit_exit_code() {
        let mut encoder = EventEncoder::default();
        let wire = encoder.encode(StreamEvent::Data(Bytes::from_static(b"hi")));

        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "data", "data": "hi" }));
    }
}
