//! Wire events pushed to stream observers and the `data: <json>\n\n` framing.

use serde::{Deserialize, Serialize};

use crate::status::{ChallengeArtifact, SessionSnapshot, SessionStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    Status,
    Qr,
    Code,
    /// Anything a newer server may send that this build does not know.
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: StreamEventKind,
    pub data: String,
}

impl StreamEvent {
    pub fn status(status: &SessionStatus) -> Self {
        Self {
            kind: StreamEventKind::Status,
            data: status.to_string(),
        }
    }

    pub fn qr(challenge: &ChallengeArtifact) -> Self {
        Self {
            kind: StreamEventKind::Qr,
            data: challenge.as_str().to_string(),
        }
    }

    pub fn code(code: &str) -> Self {
        Self {
            kind: StreamEventKind::Code,
            data: code.to_string(),
        }
    }

    /// Events that bring a freshly attached observer up to date.
    pub fn replay(snapshot: &SessionSnapshot) -> Vec<Self> {
        let mut events = vec![Self::status(&snapshot.status)];
        if let Some(challenge) = &snapshot.challenge {
            events.push(Self::qr(challenge));
        }
        events
    }
}

/// Incremental decoder for the consumer side of the stream.
///
/// Chunks may split frames anywhere; complete frames are returned as soon as
/// their terminating blank line arrives. Comment lines (keep-alives) and
/// frames whose payload is not a valid event are skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.finish_frame() {
                    events.push(event);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // `:` comments and other SSE fields carry nothing for us.
        }
        events
    }

    fn finish_frame(&mut self) -> Option<StreamEvent> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        serde_json::from_str(&payload).ok()
    }
}
