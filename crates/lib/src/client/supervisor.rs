//! Connection supervisor: the single task that owns the connection.
//!
//! Commands from [`ChatClient`](crate::client::ChatClient), inbound transport
//! events and the reconnect timer are all handled in one `select!` loop, so
//! connection state, reconnect counters and the stream assembler are never
//! touched concurrently. Exactly one connection and at most one reconnect
//! timer exist at any time.

use crate::client::assembler::{AssemblerOutput, StreamAssembler, StreamChunk};
use crate::client::error::{ProtocolError, TransportError};
use crate::client::policy::{ReconnectDecision, ReconnectPolicy};
use crate::client::protocol::{self, InboundFrame};
use crate::client::transport::{
    channel_url, Connection, Connector, TransportEvent, NORMAL_CLOSURE,
};
use crate::client::ConnectionState;
use crate::conversation::{ConversationId, ConversationStore};
use crate::error_log::{AppError, ErrorCode, ErrorLog};
use crate::message::{Message, MessageId};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Sleep;

pub(crate) type MessageCallback = Box<dyn FnMut(&Message) + Send>;
pub(crate) type ChunkCallback = Box<dyn FnMut(&StreamChunk) + Send>;

/// Snapshot published on every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    /// Automatic reconnect attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Last fully or partially assembled assistant message.
    pub latest_message: Option<Message>,
}

/// Everything observable about the client, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    StateChanged(ConnectionState),
    StreamStarted { message_id: MessageId },
    Chunk(StreamChunk),
    /// A complete assistant message, already appended to the store.
    Message(Message),
    StreamCancelled { message_id: MessageId },
    Error(AppError),
    /// Reconnect budget spent. Sent once per exhaustion; only `reconnect()` resumes.
    GaveUp { attempts: u32 },
}

pub(crate) enum Command {
    Connect,
    Disconnect,
    Reconnect,
    /// Encoded outbound frame.
    Send(String),
    SetConversation(ConversationId),
    OnMessage(MessageCallback),
    OnChunk(ChunkCallback),
}

pub(crate) struct Supervisor {
    endpoint: String,
    connector: Arc<dyn Connector>,
    store: Arc<dyn ConversationStore>,
    errors: Arc<ErrorLog>,
    policy: ReconnectPolicy,
    assembler: StreamAssembler,
    conn: Option<Box<dyn Connection>>,
    retry: Option<Pin<Box<Sleep>>>,
    gave_up: bool,
    conversation_id: ConversationId,
    on_message: Vec<MessageCallback>,
    on_chunk: Vec<ChunkCallback>,
    status: watch::Sender<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        endpoint: String,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ConversationStore>,
        errors: Arc<ErrorLog>,
        policy: ReconnectPolicy,
        conversation_id: ConversationId,
        status: watch::Sender<ClientStatus>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            endpoint,
            connector,
            store,
            errors,
            policy,
            assembler: StreamAssembler::new(),
            conn: None,
            retry: None,
            gave_up: false,
            conversation_id,
            on_message: Vec::new(),
            on_chunk: Vec::new(),
            status,
            events,
        }
    }

    /// Run until every command sender is dropped, then close with 1000.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                () = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    log::debug!("reconnect timer fired (attempt {})", self.policy.attempts());
                    self.open().await;
                }
                event = recv_next(&mut self.conn) => self.handle_transport(event).await,
            }
        }
        self.retry = None;
        if let Some(mut conn) = self.conn.take() {
            conn.close(NORMAL_CLOSURE, "client dropped").await;
        }
        self.assembler.reset();
        self.set_state(ConnectionState::Disconnected);
        log::debug!("connection supervisor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.open().await,
            Command::Disconnect => self.disconnect().await,
            Command::Reconnect => {
                log::info!("manual reconnect requested");
                self.policy.reset();
                self.gave_up = false;
                self.status.send_modify(|s| {
                    s.last_error = None;
                    s.reconnect_attempts = 0;
                });
                self.open().await;
            }
            Command::Send(text) => self.transmit(text).await,
            Command::SetConversation(id) => {
                log::debug!("conversation set to {}", id);
                self.conversation_id = id;
            }
            Command::OnMessage(cb) => self.on_message.push(cb),
            Command::OnChunk(cb) => self.on_chunk.push(cb),
        }
    }

    /// Tear down whatever exists, then make one connect attempt.
    async fn open(&mut self) {
        self.retry = None;
        if let Some(mut old) = self.conn.take() {
            old.close(NORMAL_CLOSURE, "reconnecting").await;
        }
        self.assembler.reset();
        self.set_state(ConnectionState::Connecting);

        let result = match channel_url(&self.endpoint) {
            Ok(url) => {
                log::debug!("connecting to {}", url);
                self.connector.connect(&url).await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(conn) => {
                self.conn = Some(conn);
                self.policy.reset();
                self.gave_up = false;
                self.status.send_modify(|s| {
                    s.last_error = None;
                    s.reconnect_attempts = 0;
                });
                self.set_state(ConnectionState::Open);
                log::info!("connected to {}", self.endpoint);
            }
            Err(e) => self.connection_lost(e),
        }
    }

    async fn disconnect(&mut self) {
        self.retry = None;
        if let Some(mut conn) = self.conn.take() {
            self.set_state(ConnectionState::Closing);
            conn.close(NORMAL_CLOSURE, "client disconnect").await;
            log::info!("disconnected from {}", self.endpoint);
        }
        self.assembler.reset();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn transmit(&mut self, text: String) {
        let Some(conn) = self.conn.as_mut() else {
            // The connection dropped between the facade's check and now.
            return self.send_failed(TransportError::NotConnected);
        };
        log::debug!("-> {}", text);
        if let Err(e) = conn.send_text(text).await {
            self.send_failed(e);
        }
    }

    fn send_failed(&mut self, e: TransportError) {
        let message = e.to_string();
        log::warn!("{}", message);
        self.status.send_modify(|s| s.last_error = Some(message.clone()));
        self.report(e.error_code(), message, None);
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(raw) => self.handle_frame(&raw).await,
            closed @ TransportEvent::Closed { .. } if closed.is_normal_closure() => {
                self.conn = None;
                log::info!("connection closed normally");
                let reason = match closed {
                    TransportEvent::Closed { reason, .. } if !reason.is_empty() => Some(reason),
                    _ => None,
                };
                // Logged for diagnostics only; a normal close is not a client error.
                self.errors.record(
                    ErrorCode::NormalClosure,
                    "connection closed by server".to_string(),
                    reason,
                );
                self.assembler.reset();
                self.set_state(ConnectionState::Disconnected);
            }
            TransportEvent::Closed { code, reason } => {
                self.conn = None;
                self.connection_lost(TransportError::AbnormalClose { code, reason });
            }
        }
    }

    async fn handle_frame(&mut self, raw: &[u8]) {
        if self.status.borrow().state != ConnectionState::Open {
            log::debug!("ignoring frame while not open");
            return;
        }
        let frame = match protocol::decode(raw) {
            Ok(frame) => frame,
            Err(e) => return self.protocol_error(e),
        };
        log::debug!("<- {}", frame.kind());
        match frame {
            InboundFrame::Error { content, code, .. } => {
                let text = content.unwrap_or_else(|| "unknown server error".to_string());
                let e = ProtocolError::Server(text);
                let message = e.to_string();
                log::warn!("{}", message);
                self.status
                    .send_modify(|s| s.last_error = Some(message.clone()));
                self.report(
                    e.error_code(),
                    message,
                    code.map(|c| format!("server code {}", c)),
                );
            }
            InboundFrame::Pong => log::debug!("pong"),
            InboundFrame::ConnectionEstablished { session_id } => {
                log::debug!("server session {}", session_id.as_deref().unwrap_or("-"));
            }
            frame => match self.assembler.apply(frame) {
                Ok(output) => self.deliver(output).await,
                Err(e) => self.protocol_error(e),
            },
        }
    }

    async fn deliver(&mut self, output: AssemblerOutput) {
        match output {
            AssemblerOutput::Started(message) => {
                let message_id = message.id;
                self.status
                    .send_modify(|s| s.latest_message = Some(message));
                self.emit(ClientEvent::StreamStarted { message_id });
            }
            AssemblerOutput::Chunk(chunk) => {
                let extended = self.status.send_if_modified(|s| match s.latest_message.as_mut() {
                    Some(m) if m.id == chunk.message_id => {
                        m.content.push_str(&chunk.delta);
                        true
                    }
                    _ => false,
                });
                if !extended {
                    if let Some(open) = self.assembler.open_stream() {
                        let partial = open.to_message();
                        self.status
                            .send_modify(|s| s.latest_message = Some(partial));
                    }
                }
                for cb in self.on_chunk.iter_mut() {
                    cb(&chunk);
                }
                self.emit(ClientEvent::Chunk(chunk));
            }
            AssemblerOutput::Completed(message) => {
                self.status
                    .send_modify(|s| s.latest_message = Some(message.clone()));
                for cb in self.on_message.iter_mut() {
                    cb(&message);
                }
                self.store
                    .append(&self.conversation_id, message.clone())
                    .await;
                self.emit(ClientEvent::Message(message));
            }
            AssemblerOutput::Cancelled { message_id } => {
                log::info!("stream {} cancelled by server", message_id);
                self.emit(ClientEvent::StreamCancelled { message_id });
            }
            AssemblerOutput::Ignored => {}
        }
    }

    /// Any failed connect or abnormal close: record it, then ask the policy.
    fn connection_lost(&mut self, e: TransportError) {
        self.conn = None;
        self.assembler.reset();
        let message = e.to_string();
        log::warn!("{}", message);
        let details = match &e {
            TransportError::AbnormalClose { reason, .. } if !reason.is_empty() => {
                Some(reason.clone())
            }
            _ => None,
        };
        self.status.send_modify(|s| s.last_error = Some(message.clone()));
        self.report(e.error_code(), message, details);
        self.set_state(ConnectionState::Disconnected);
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        match self.policy.on_failure() {
            ReconnectDecision::Retry { attempt, delay } => {
                log::info!(
                    "reconnecting in {} ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt,
                    self.policy.config().max_attempts
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
                self.status
                    .send_modify(|s| s.reconnect_attempts = attempt);
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.retry = None;
                if self.gave_up {
                    return;
                }
                self.gave_up = true;
                let code = ErrorCode::ReconnectExhausted;
                let message = format!("gave up after {} reconnect attempts", attempts);
                log::error!("{}", message);
                self.status
                    .send_modify(|s| s.last_error = Some(code.user_message().to_string()));
                self.report(code, message, None);
                self.emit(ClientEvent::GaveUp { attempts });
            }
        }
    }

    fn protocol_error(&mut self, e: ProtocolError) {
        let message = e.to_string();
        log::warn!("dropping frame: {}", message);
        self.status.send_modify(|s| s.last_error = Some(message.clone()));
        self.report(e.error_code(), message, None);
    }

    /// Record in the error log and publish on the error channel.
    fn report(&mut self, code: ErrorCode, message: String, details: Option<String>) {
        let entry = self.errors.record(code, message, details);
        self.emit(ClientEvent::Error(entry));
    }

    fn set_state(&mut self, state: ConnectionState) {
        let changed = self.status.send_if_modified(|s| {
            if s.state == state {
                false
            } else {
                s.state = state;
                true
            }
        });
        if changed {
            log::debug!("connection state -> {}", state);
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

async fn wait_retry(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn recv_next(conn: &mut Option<Box<dyn Connection>>) -> TransportEvent {
    match conn {
        Some(conn) => conn.recv().await,
        None => std::future::pending().await,
    }
}
