//! Server-sent event framing and the realtime database's streaming events.

use remote_store::tree;
use serde::Deserialize;
use serde_json::Value;
use shared::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines and
/// UTF-8 sequences anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    path: String,
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Replaces the value at `path`, relative to the subscribed location.
    Put { path: String, data: Value },
    /// Merges the children of `data` into `path`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server revoked the listener, usually because rules now deny it.
    Cancel,
    AuthRevoked,
}

impl StreamEvent {
    /// `Ok(None)` for event types the stream does not act on.
    pub fn from_sse(event: &SseEvent) -> Result<Option<Self>, StoreError> {
        let parse = || {
            serde_json::from_str::<Payload>(&event.data)
                .map_err(|err| StoreError::Malformed(format!("{} event: {err}", event.event)))
        };

        match event.event.as_str() {
            "put" => {
                let payload = parse()?;
                Ok(Some(StreamEvent::Put {
                    path: payload.path,
                    data: payload.data,
                }))
            }
            "patch" => {
                let payload = parse()?;
                Ok(Some(StreamEvent::Patch {
                    path: payload.path,
                    data: payload.data,
                }))
            }
            "keep-alive" => Ok(Some(StreamEvent::KeepAlive)),
            "cancel" => Ok(Some(StreamEvent::Cancel)),
            "auth_revoked" => Ok(Some(StreamEvent::AuthRevoked)),
            _ => Ok(None),
        }
    }

    /// Applies a data event to the local copy of the subscribed subtree.
    pub fn apply(&self, snapshot: &mut Value) {
        match self {
            StreamEvent::Put { path, data } => {
                let segments = split(path);
                tree::write_at(snapshot, &segments, data.clone());
            }
            StreamEvent::Patch { path, data } => {
                let Value::Object(children) = data else {
                    return;
                };
                let base = split(path);
                for (key, value) in children {
                    let mut segments = base.clone();
                    segments.extend(split(key));
                    tree::write_at(snapshot, &segments, value.clone());
                }
            }
            StreamEvent::KeepAlive | StreamEvent::Cancel | StreamEvent::AuthRevoked => {}
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_events_across_chunk_boundaries() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: put\ndata: {\"path\":\"/\",").is_empty());
        let events = parser.feed(b"\"data\":1}\r\n\r\n: comment\n\nevent: keep-alive\ndata: null\n\n");

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "put".into(),
                    data: r#"{"path":"/","data":1}"#.into(),
                },
                SseEvent {
                    event: "keep-alive".into(),
                    data: "null".into(),
                },
            ]
        );
    }

    #[test]
    fn multi_byte_characters_survive_split_chunks() {
        let mut parser = SseParser::default();
        let frame = "event: put\ndata: {\"path\":\"/\",\"data\":\"Phòng\"}\n\n".as_bytes();
        let split_at = frame.iter().position(|byte| *byte > 0x7f).expect("non-ascii") + 1;

        assert!(parser.feed(&frame[..split_at]).is_empty());
        let events = parser.feed(&frame[split_at..]);
        let decoded = StreamEvent::from_sse(&events[0]).expect("valid").expect("put");
        assert_eq!(
            decoded,
            StreamEvent::Put {
                path: "/".into(),
                data: json!("Phòng"),
            }
        );
    }

    #[test]
    fn put_and_patch_update_the_local_subtree() {
        let mut snapshot = Value::Null;
        StreamEvent::Put {
            path: "/".into(),
            data: json!({"A1": {"Den1": 0, "NhietDo": 25}}),
        }
        .apply(&mut snapshot);
        StreamEvent::Put {
            path: "/A1/Den1".into(),
            data: json!(1),
        }
        .apply(&mut snapshot);
        StreamEvent::Patch {
            path: "/A1".into(),
            data: json!({"NhietDo": null, "Quat1": 1}),
        }
        .apply(&mut snapshot);

        assert_eq!(snapshot, json!({"A1": {"Den1": 1, "Quat1": 1}}));
    }

    #[test]
    fn control_events_are_recognized() {
        let event = |name: &str| SseEvent {
            event: name.into(),
            data: "null".into(),
        };
        assert_eq!(
            StreamEvent::from_sse(&event("cancel")),
            Ok(Some(StreamEvent::Cancel))
        );
        assert_eq!(
            StreamEvent::from_sse(&event("auth_revoked")),
            Ok(Some(StreamEvent::AuthRevoked))
        );
        assert_eq!(StreamEvent::from_sse(&event("rules_debug")), Ok(None));
        assert!(StreamEvent::from_sse(&event("put")).is_err());
    }
}
