use serde_json::Value;

use crate::api::models::ChatMessage;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let line = text.trim_end_matches(['\n', '\r']);
            if let Some(frame) = self.feed_line(line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn feed_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".into()),
            data,
            id,
        })
    }
}

/// Events the chat stream emits for one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Initial(Vec<ChatMessage>),
    New(ChatMessage),
}

impl StreamEvent {
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        let payload: Value = match serde_json::from_str(&frame.data) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("unparsable {} payload: {e}", frame.event);
                return None;
            }
        };
        match frame.event.as_str() {
            "initial" => Some(StreamEvent::Initial(ChatMessage::list_from_value(&payload))),
            "new" => {
                let msg = ChatMessage::from_value(&payload);
                if msg.is_none() {
                    log::debug!("dropping `new` event without id");
                }
                msg.map(StreamEvent::New)
            }
            other => {
                log::debug!("ignoring stream event {other}");
                None
            }
        }
    }
}
