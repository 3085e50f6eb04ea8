//! Stream assembly: folds `stream_*` frames into one growing assistant message.
//!
//! Per stream: `Absent → Streaming → Finalized`. Finalized streams leave the
//! table immediately, so at most one stream is ever held, and a second
//! `stream_start` while one is open is rejected. Chunks with no matching
//! open stream are dropped; no state is fabricated for them. A cancelled
//! stream takes no more chunks but still waits for its `stream_end`.

use crate::client::error::ProtocolError;
use crate::client::protocol::InboundFrame;
use crate::message::{parse_timestamp, Message, MessageId, Role};
use chrono::{DateTime, Utc};
use std::fmt;

/// Logical stream identifier: the server's `message_id` when it sends one,
/// otherwise the id this client assigned at `stream_start`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Server(String),
    Local(MessageId),
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::Server(id) => f.write_str(id),
            StreamKey::Local(id) => write!(f, "local:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Streaming,
    /// The server reported `stream_cancelled`; `stream_end` still finalizes it.
    Cancelled,
}

/// The one open stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyState {
    pub key: StreamKey,
    pub message_id: MessageId,
    pub content: String,
    pub started_at: DateTime<Utc>,
    pub phase: StreamPhase,
}

impl AssemblyState {
    pub fn is_streaming(&self) -> bool {
        self.phase == StreamPhase::Streaming
    }

    /// Snapshot as a message, marked by the caller as still in progress.
    pub fn to_message(&self) -> Message {
        Message {
            id: self.message_id,
            role: Role::Assistant,
            content: self.content.clone(),
            timestamp: self.started_at,
            files: Vec::new(),
        }
    }
}

/// Incremental content for responsive rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub message_id: MessageId,
    pub delta: String,
    /// Everything received so far, including `delta`.
    pub content: String,
}

/// What folding one frame produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AssemblerOutput {
    Started(Message),
    Chunk(StreamChunk),
    /// A finished message: a finalized stream or a non-streamed reply.
    Completed(Message),
    Cancelled { message_id: MessageId },
    /// Frame carries nothing for the assembler (`error`, `pong`, empty chunk).
    Ignored,
}

#[derive(Debug, Default)]
pub struct StreamAssembler {
    open: Option<AssemblyState>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_stream(&self) -> Option<&AssemblyState> {
        self.open.as_ref()
    }

    /// Fold one frame. Out-of-sequence frames return an error and leave the
    /// table unchanged.
    pub fn apply(&mut self, frame: InboundFrame) -> Result<AssemblerOutput, ProtocolError> {
        match frame {
            InboundFrame::Assistant { content, timestamp }
            | InboundFrame::FileResponse { content, timestamp } => Ok(AssemblerOutput::Completed(
                Message::assistant(content, parse_timestamp(timestamp.as_deref())),
            )),
            InboundFrame::StreamStart {
                message_id,
                timestamp,
            } => self.start(message_id, timestamp.as_deref()),
            InboundFrame::StreamChunk {
                content,
                message_id,
            } => {
                let state = self.matching("stream_chunk", message_id.as_deref())?;
                if !state.is_streaming() {
                    return Err(ProtocolError::NotStreaming {
                        frame: "stream_chunk",
                        id: state.key.to_string(),
                    });
                }
                if content.is_empty() {
                    return Ok(AssemblerOutput::Ignored);
                }
                state.content.push_str(&content);
                Ok(AssemblerOutput::Chunk(StreamChunk {
                    message_id: state.message_id,
                    delta: content,
                    content: state.content.clone(),
                }))
            }
            InboundFrame::StreamCancelled { message_id } => {
                let state = self.matching("stream_cancelled", message_id.as_deref())?;
                state.phase = StreamPhase::Cancelled;
                Ok(AssemblerOutput::Cancelled {
                    message_id: state.message_id,
                })
            }
            InboundFrame::StreamEnd { message_id } => {
                self.matching("stream_end", message_id.as_deref())?;
                let state = self.open.take().ok_or(ProtocolError::NoOpenStream("stream_end"))?;
                Ok(AssemblerOutput::Completed(state.to_message()))
            }
            InboundFrame::Error { .. }
            | InboundFrame::Pong
            | InboundFrame::ConnectionEstablished { .. } => Ok(AssemblerOutput::Ignored),
        }
    }

    /// Abandon the open stream (the connection carrying it is gone).
    pub fn reset(&mut self) -> Option<AssemblyState> {
        let abandoned = self.open.take();
        if let Some(state) = &abandoned {
            log::warn!(
                "abandoning unfinished stream {} ({} bytes received)",
                state.key,
                state.content.len()
            );
        }
        abandoned
    }

    fn start(
        &mut self,
        server_id: Option<String>,
        timestamp: Option<&str>,
    ) -> Result<AssemblerOutput, ProtocolError> {
        if let Some(open) = &self.open {
            return Err(ProtocolError::StreamAlreadyOpen {
                open: open.key.to_string(),
            });
        }
        let message_id = MessageId::new();
        let key = match server_id {
            Some(id) => StreamKey::Server(id),
            None => StreamKey::Local(message_id),
        };
        let state = AssemblyState {
            key,
            message_id,
            content: String::new(),
            started_at: parse_timestamp(timestamp),
            phase: StreamPhase::Streaming,
        };
        let started = state.to_message();
        self.open = Some(state);
        Ok(AssemblerOutput::Started(started))
    }

    /// The open stream, if `frame_id` (when present) names it.
    fn matching(
        &mut self,
        frame: &'static str,
        frame_id: Option<&str>,
    ) -> Result<&mut AssemblyState, ProtocolError> {
        let Some(state) = self.open.as_mut() else {
            return Err(match frame_id {
                Some(id) => ProtocolError::UnknownStream {
                    frame,
                    id: id.to_string(),
                },
                None => ProtocolError::NoOpenStream(frame),
            });
        };
        match (frame_id, &state.key) {
            (None, _) => Ok(state),
            (Some(id), StreamKey::Server(open)) if id == open => Ok(state),
            (Some(id), _) => Err(ProtocolError::UnknownStream {
                frame,
                id: id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(id: Option<&str>) -> InboundFrame {
        InboundFrame::StreamStart {
            message_id: id.map(String::from),
            timestamp: None,
        }
    }

    fn chunk(id: Option<&str>, text: &str) -> InboundFrame {
        InboundFrame::StreamChunk {
            content: text.to_string(),
            message_id: id.map(String::from),
        }
    }

    fn end(id: Option<&str>) -> InboundFrame {
        InboundFrame::StreamEnd {
            message_id: id.map(String::from),
        }
    }

    #[test]
    fn chunks_accumulate_into_one_message() {
        let mut a = StreamAssembler::new();
        let started = match a.apply(start(None)).unwrap() {
            AssemblerOutput::Started(m) => m,
            other => panic!("unexpected {:?}", other),
        };
        assert!(started.content.is_empty());
        a.apply(chunk(None, "A")).unwrap();
        match a.apply(chunk(None, "B")).unwrap() {
            AssemblerOutput::Chunk(c) => {
                assert_eq!(c.delta, "B");
                assert_eq!(c.content, "AB");
                assert_eq!(c.message_id, started.id);
            }
            other => panic!("unexpected {:?}", other),
        }
        match a.apply(end(None)).unwrap() {
            AssemblerOutput::Completed(m) => {
                assert_eq!(m.content, "AB");
                assert_eq!(m.id, started.id);
                assert_eq!(m.role, Role::Assistant);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(a.open_stream().is_none());
    }

    #[test]
    fn chunk_without_start_is_dropped() {
        let mut a = StreamAssembler::new();
        assert_eq!(
            a.apply(chunk(None, "x")),
            Err(ProtocolError::NoOpenStream("stream_chunk"))
        );
        assert_eq!(
            a.apply(chunk(Some("m1"), "x")),
            Err(ProtocolError::UnknownStream {
                frame: "stream_chunk",
                id: "m1".into()
            })
        );
        assert!(a.open_stream().is_none());
    }

    #[test]
    fn chunk_after_end_is_dropped() {
        let mut a = StreamAssembler::new();
        a.apply(start(Some("m1"))).unwrap();
        a.apply(end(Some("m1"))).unwrap();
        assert!(a.apply(chunk(Some("m1"), "late")).is_err());
        assert!(a.apply(end(Some("m1"))).is_err());
    }

    #[test]
    fn second_start_while_open_is_rejected() {
        let mut a = StreamAssembler::new();
        a.apply(start(Some("A"))).unwrap();
        assert_eq!(
            a.apply(start(Some("B"))),
            Err(ProtocolError::StreamAlreadyOpen { open: "A".into() })
        );
        assert!(matches!(
            a.apply(chunk(Some("A"), "x")).unwrap(),
            AssemblerOutput::Chunk(_)
        ));
        assert!(a.apply(chunk(Some("B"), "y")).is_err());
        match a.apply(end(Some("A"))).unwrap() {
            AssemblerOutput::Completed(m) => assert_eq!(m.content, "x"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(a.apply(end(Some("B"))).is_err());
    }

    #[test]
    fn id_less_frames_attach_to_the_open_stream() {
        let mut a = StreamAssembler::new();
        a.apply(start(Some("srv"))).unwrap();
        a.apply(chunk(None, "ok")).unwrap();
        match a.apply(end(None)).unwrap() {
            AssemblerOutput::Completed(m) => assert_eq!(m.content, "ok"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancelled_stream_keeps_partial_content_until_end() {
        let mut a = StreamAssembler::new();
        a.apply(start(None)).unwrap();
        a.apply(chunk(None, "part")).unwrap();
        assert!(matches!(
            a.apply(InboundFrame::StreamCancelled { message_id: None }).unwrap(),
            AssemblerOutput::Cancelled { .. }
        ));
        assert!(!a.open_stream().unwrap().is_streaming());
        match a.apply(end(None)).unwrap() {
            AssemblerOutput::Completed(m) => assert_eq!(m.content, "part"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn chunk_after_cancellation_is_rejected() {
        let mut a = StreamAssembler::new();
        a.apply(start(Some("m1"))).unwrap();
        a.apply(chunk(Some("m1"), "part")).unwrap();
        a.apply(InboundFrame::StreamCancelled {
            message_id: Some("m1".into()),
        })
        .unwrap();
        assert_eq!(
            a.apply(chunk(Some("m1"), "LATE")),
            Err(ProtocolError::NotStreaming {
                frame: "stream_chunk",
                id: "m1".into()
            })
        );
        assert!(a.apply(chunk(None, "LATE")).is_err());
        assert_eq!(a.open_stream().unwrap().content, "part");
        match a.apply(end(Some("m1"))).unwrap() {
            AssemblerOutput::Completed(m) => assert_eq!(m.content, "part"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_streamed_replies_bypass_the_table() {
        let mut a = StreamAssembler::new();
        a.apply(start(None)).unwrap();
        let out = a
            .apply(InboundFrame::FileResponse {
                content: "got your file".into(),
                timestamp: Some("2025-05-01T10:00:00Z".into()),
            })
            .unwrap();
        match out {
            AssemblerOutput::Completed(m) => {
                assert_eq!(m.content, "got your file");
                assert_eq!(m.timestamp.to_rfc3339(), "2025-05-01T10:00:00+00:00");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(a.open_stream().is_some());
    }

    #[test]
    fn empty_chunk_is_ignored_and_reset_abandons_stream() {
        let mut a = StreamAssembler::new();
        a.apply(start(None)).unwrap();
        assert_eq!(a.apply(chunk(None, "")).unwrap(), AssemblerOutput::Ignored);
        a.apply(chunk(None, "abc")).unwrap();
        let abandoned = a.reset().unwrap();
        assert_eq!(abandoned.content, "abc");
        assert!(a.open_stream().is_none());
        assert!(a.reset().is_none());
    }
}
