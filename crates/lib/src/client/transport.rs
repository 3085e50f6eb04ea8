//! Transport seam: [`Connector`] opens a [`Connection`], which carries raw
//! frames. [`WsConnector`] is the tokio-tungstenite implementation.

use crate::client::error::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

/// Close code for a requested, orderly shutdown. Any other code is abnormal.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Path of the realtime channel under the service base URL.
pub const CHANNEL_PATH: &str = "/ws";

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound frame, undecoded.
    Frame(Vec<u8>),
    /// The connection is gone. `code` is `None` when the peer vanished without a close frame.
    Closed { code: Option<u16>, reason: String },
}

impl TransportEvent {
    pub fn is_normal_closure(&self) -> bool {
        matches!(self, TransportEvent::Closed { code: Some(NORMAL_CLOSURE), .. })
    }
}

/// Opens connections to a channel URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// One live, exclusively owned connection.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event. Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> TransportEvent;

    /// Close with `code`. Errors are ignored; the connection is unusable afterwards.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Rewrite a service base URL into its channel URL: `http` becomes `ws`,
/// `https` becomes `wss`, and [`CHANNEL_PATH`] is appended once. Query and
/// fragment are kept.
pub fn channel_url(endpoint: &str) -> Result<String, TransportError> {
    let invalid = || TransportError::InvalidEndpoint(endpoint.to_string());
    let mut url = Url::parse(endpoint.trim()).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid()),
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid());
    }
    url.set_scheme(scheme).map_err(|_| invalid())?;

    let segment = CHANNEL_PATH.trim_start_matches('/');
    let has_channel = url
        .path_segments()
        .and_then(|s| s.filter(|p| !p.is_empty()).last())
        == Some(segment);
    {
        let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
        segments.pop_if_empty();
        if !has_channel {
            segments.push(segment);
        }
    }
    Ok(url.to_string())
}

/// WebSocket connector (tokio-tungstenite) with a connect timeout.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_CONNECT_TIMEOUT_MS))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let connecting = tokio_tungstenite::connect_async(url);
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connecting)
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        log::debug!("websocket handshake complete: {}", url);
        Ok(Box::new(WsConnection { ws, closed: false }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.closed {
            return std::future::pending().await;
        }
        loop {
            let next = self.ws.next().await;
            let event = match next {
                Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.into_bytes()),
                Some(Ok(Message::Binary(bytes))) => TransportEvent::Frame(bytes),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    TransportEvent::Closed { code, reason }
                }
                // Ping replies are queued by tungstenite and flushed on the next read or write.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => TransportEvent::Closed {
                    code: None,
                    reason: e.to_string(),
                },
                None => TransportEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                },
            };
            if matches!(event, TransportEvent::Closed { .. }) {
                self.closed = true;
            }
            return event;
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        if let Err(e) = self.ws.close(Some(frame)).await {
            log::debug!("websocket close: {}", e);
        }
    }
}
