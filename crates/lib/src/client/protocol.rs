//! Wire frames and the codec between them and raw bytes.
//!
//! Frames are JSON objects tagged by `type`. Inbound: `assistant` (alias
//! `message`), `stream_start`, `stream_chunk`, `stream_end`,
//! `stream_cancelled`, `file_response`, `error`, `pong`,
//! `connection_established`. Outbound: `chat`,
//! `file`, `cancel_stream`, `ping`.

use crate::client::error::{ProtocolError, ValidationError};
use crate::files::{self, FileDescriptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound tags this client understands.
pub const INBOUND_TYPES: &[&str] = &[
    "assistant",
    "message",
    "stream_start",
    "stream_chunk",
    "stream_end",
    "stream_cancelled",
    "file_response",
    "error",
    "pong",
    "connection_established",
];

/// Frame received from the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Complete, non-streamed reply.
    #[serde(alias = "message")]
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    StreamStart {
        #[serde(default)]
        message_id: Option<String>,
        #[serde(default)]
        timestamp: Option<String>,
    },
    StreamChunk {
        #[serde(default, alias = "chunk")]
        content: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    StreamEnd {
        #[serde(default)]
        message_id: Option<String>,
    },
    StreamCancelled {
        #[serde(default)]
        message_id: Option<String>,
    },
    /// Complete reply to a `file` submission.
    FileResponse {
        #[serde(default)]
        content: String,
        #[serde(default)]
        timestamp: Option<String>,
    },
    Error {
        #[serde(default, alias = "error", alias = "message")]
        content: Option<String>,
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        message_id: Option<String>,
    },
    Pong,
    /// Server greeting after the handshake. Carries nothing the client needs.
    ConnectionEstablished {
        #[serde(default)]
        session_id: Option<String>,
    },
}

impl InboundFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundFrame::Assistant { .. } => "assistant",
            InboundFrame::StreamStart { .. } => "stream_start",
            InboundFrame::StreamChunk { .. } => "stream_chunk",
            InboundFrame::StreamEnd { .. } => "stream_end",
            InboundFrame::StreamCancelled { .. } => "stream_cancelled",
            InboundFrame::FileResponse { .. } => "file_response",
            InboundFrame::Error { .. } => "error",
            InboundFrame::Pong => "pong",
            InboundFrame::ConnectionEstablished { .. } => "connection_established",
        }
    }
}

/// Frame sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Chat {
        message: String,
        /// Ask the server to stream the reply as `stream_*` frames.
        streaming: bool,
        timestamp: DateTime<Utc>,
    },
    File {
        file: FileDescriptor,
        timestamp: DateTime<Utc>,
    },
    CancelStream {
        timestamp: DateTime<Utc>,
    },
    Ping {
        timestamp: DateTime<Utc>,
    },
}

/// Build a `chat` frame. Text is trimmed; empty or whitespace-only text is rejected.
pub fn chat_frame(text: &str, streaming: bool) -> Result<OutboundFrame, ValidationError> {
    let message = text.trim();
    if message.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(OutboundFrame::Chat {
        message: message.to_string(),
        streaming,
        timestamp: Utc::now(),
    })
}

/// Build a `file` frame after validating the descriptor.
pub fn file_frame(file: &FileDescriptor) -> Result<OutboundFrame, ValidationError> {
    files::validate(file)?;
    Ok(OutboundFrame::File {
        file: file.clone(),
        timestamp: Utc::now(),
    })
}

pub fn cancel_stream_frame() -> OutboundFrame {
    OutboundFrame::CancelStream {
        timestamp: Utc::now(),
    }
}

pub fn ping_frame() -> OutboundFrame {
    OutboundFrame::Ping {
        timestamp: Utc::now(),
    }
}

/// Serialize an outbound frame to its JSON text.
pub fn encode(frame: &OutboundFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Parse raw bytes into an inbound frame. Never returns a half-formed frame.
pub fn decode(raw: &[u8]) -> Result<InboundFrame, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let kind = match value.get("type") {
        Some(serde_json::Value::String(t)) => t.clone(),
        _ => return Err(ProtocolError::MissingType),
    };
    if !INBOUND_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        kind,
        detail: e.to_string(),
    })
}
