//! Realtime connection client.
//!
//! One supervisor task owns the connection, the reconnect timer and the
//! stream assembler; [`ChatClient`] handles talk to it over a command
//! channel and observe it through watch and broadcast channels.

pub mod assembler;
pub mod error;
mod facade;
pub mod policy;
pub mod protocol;
mod supervisor;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use assembler::StreamChunk;
pub use error::{ProtocolError, SendError, TransportError, ValidationError};
pub use facade::{ChatClient, DEFAULT_CONVERSATION};
pub use policy::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{ClientEvent, ClientStatus};
pub use transport::{Connection, Connector, TransportEvent, WsConnector};

use std::fmt;

/// Lifecycle of the single physical connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}
