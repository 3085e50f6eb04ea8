//! [`ChatClient`]: the handle a UI holds.

use crate::client::assembler::StreamChunk;
use crate::client::error::{SendError, ValidationError};
use crate::client::policy::ReconnectPolicy;
use crate::client::protocol::{self, OutboundFrame};
use crate::client::supervisor::{ClientEvent, ClientStatus, Command, Supervisor};
use crate::client::transport::{Connector, WsConnector};
use crate::client::ConnectionState;
use crate::config::ClientConfig;
use crate::conversation::{ConversationId, ConversationStore};
use crate::error_log::ErrorLog;
use crate::files::FileDescriptor;
use crate::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// Conversation used until [`ChatClient::set_conversation`] picks another.
pub const DEFAULT_CONVERSATION: &str = "default";

const EVENT_CAPACITY: usize = 256;

/// Cheap, cloneable handle to one connection supervisor.
///
/// All operations return immediately; the supervisor task does the I/O.
/// When the last handle is dropped the supervisor closes the connection
/// with code 1000 and exits.
#[derive(Clone)]
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
    events: broadcast::Sender<ClientEvent>,
    errors: Arc<ErrorLog>,
    streaming: bool,
}

impl ChatClient {
    /// Spawn the supervisor on the current tokio runtime. Does not connect.
    pub fn spawn(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn ConversationStore>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let supervisor = Supervisor::new(
            config.endpoint.clone(),
            connector,
            store,
            errors.clone(),
            ReconnectPolicy::new(config.reconnect),
            DEFAULT_CONVERSATION.to_string(),
            status_tx,
            event_tx.clone(),
        );
        tokio::spawn(supervisor.run(cmd_rx));
        Self {
            commands: cmd_tx,
            status: status_rx,
            events: event_tx,
            errors,
            streaming: config.streaming,
        }
    }

    /// [`spawn`](Self::spawn) with the WebSocket connector.
    pub fn websocket(
        config: &ClientConfig,
        store: Arc<dyn ConversationStore>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        let connector = WsConnector::new(Duration::from_millis(config.connect_timeout_ms));
        Self::spawn(config, Arc::new(connector), store, errors)
    }

    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Close with code 1000 and cancel any pending retry.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Reset the attempt budget and connect now.
    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Conversation that finalized assistant messages are appended to.
    pub fn set_conversation(&self, id: impl Into<ConversationId>) {
        self.command(Command::SetConversation(id.into()));
    }

    /// Called once per complete assistant message, before it is appended to the store.
    pub fn on_message(&self, callback: impl FnMut(&Message) + Send + 'static) {
        self.command(Command::OnMessage(Box::new(callback)));
    }

    /// Called once per streamed chunk.
    pub fn on_chunk(&self, callback: impl FnMut(&StreamChunk) + Send + 'static) {
        self.command(Command::OnChunk(Box::new(callback)));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Receiver for awaiting status changes.
    pub fn watch_status(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.status.borrow().reconnect_attempts
    }

    pub fn latest_message(&self) -> Option<Message> {
        self.status.borrow().latest_message.clone()
    }

    pub fn errors(&self) -> &Arc<ErrorLog> {
        &self.errors
    }

    /// Whether chat frames ask for streamed replies.
    pub fn streaming(&self) -> bool {
        self.streaming
    }

    /// Send chat text. `false` when the text is empty or there is no open connection.
    pub fn send(&self, text: &str) -> bool {
        self.try_send(text).is_ok()
    }

    pub fn try_send(&self, text: &str) -> Result<(), SendError> {
        let frame = protocol::chat_frame(text, self.streaming).map_err(|e| self.rejected(e))?;
        self.transmit(&frame)
    }

    /// Send file metadata. `false` when the file is invalid or there is no open connection.
    pub fn send_file(&self, file: &FileDescriptor) -> bool {
        self.try_send_file(file).is_ok()
    }

    pub fn try_send_file(&self, file: &FileDescriptor) -> Result<(), SendError> {
        let frame = protocol::file_frame(file).map_err(|e| self.rejected(e))?;
        self.transmit(&frame)
    }

    /// Ask the server to stop the reply it is streaming.
    pub fn cancel_stream(&self) -> bool {
        self.transmit(&protocol::cancel_stream_frame()).is_ok()
    }

    /// Liveness check; the server answers with `pong`.
    pub fn ping(&self) -> bool {
        self.transmit(&protocol::ping_frame()).is_ok()
    }

    fn rejected(&self, e: ValidationError) -> SendError {
        log::debug!("rejected outbound frame: {}", e);
        self.errors.record(e.error_code(), e.to_string(), None);
        SendError::Invalid(e)
    }

    fn transmit(&self, frame: &OutboundFrame) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        let text = protocol::encode(frame).map_err(|e| SendError::Encode(e.to_string()))?;
        self.commands
            .send(Command::Send(text))
            .map_err(|_| SendError::Stopped)
    }

    fn command(&self, cmd: Command) {
        if self.commands.send(cmd).is_err() {
            log::debug!("client task has stopped; command dropped");
        }
    }
}
