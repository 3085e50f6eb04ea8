//! Client error taxonomy: transport, protocol and validation failures.
//!
//! None of these escape the client as panics; the supervisor turns them into
//! state transitions plus an error event, and the facade returns them from
//! the `try_*` send calls.

use crate::error_log::ErrorCode;
use crate::files::FileError;

/// Connection-level failures. Recovered by the reconnect policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),
    #[error("connection closed abnormally (code {})", display_code(.code))]
    AbnormalClose { code: Option<u16>, reason: String },
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("not connected")]
    NotConnected,
}

fn display_code(code: &Option<u16>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
}

impl TransportError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            TransportError::InvalidEndpoint(_) => ErrorCode::Connection,
            TransportError::ConnectFailed(_) => ErrorCode::NetworkUnreachable,
            TransportError::ConnectTimeout(_) => ErrorCode::NetworkTimeout,
            TransportError::AbnormalClose { .. } => ErrorCode::ConnectionLost,
            TransportError::SendFailed(_) | TransportError::NotConnected => ErrorCode::Connection,
        }
    }
}

/// Bad inbound frames or out-of-sequence stream transitions. The offending
/// frame is discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(String),
    #[error("frame has no `type` tag")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("invalid `{kind}` frame: {detail}")]
    InvalidPayload { kind: String, detail: String },
    #[error("stream_start while stream {open} is still open")]
    StreamAlreadyOpen { open: String },
    #[error("{frame} for unknown stream {id}")]
    UnknownStream { frame: &'static str, id: String },
    #[error("{0} with no open stream")]
    NoOpenStream(&'static str),
    #[error("{frame} for stream {id}, which is no longer streaming")]
    NotStreaming { frame: &'static str, id: String },
    #[error("server error: {0}")]
    Server(String),
}

impl ProtocolError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ProtocolError::Server(_) => ErrorCode::ServerError,
            _ => ErrorCode::Protocol,
        }
    }
}

/// Outbound intents rejected before transmission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error(transparent)]
    File(#[from] FileError),
}

impl ValidationError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ValidationError::EmptyMessage => ErrorCode::Validation,
            ValidationError::File(FileError::TooLarge(_)) => ErrorCode::FileTooLarge,
            ValidationError::File(FileError::UnsupportedType(_)) => ErrorCode::FileTypeUnsupported,
            ValidationError::File(_) => ErrorCode::File,
        }
    }
}

/// Why a send call returned `false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("not connected")]
    NotConnected,
    #[error("encoding frame: {0}")]
    Encode(String),
    #[error("client task has stopped")]
    Stopped,
}
