//! In-memory transport for driving the supervisor in tests.

use crate::client::error::TransportError;
use crate::client::transport::{Connection, Connector, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Far end of one scripted connection.
pub(crate) struct MockPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    broken: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn frame(&self, json: &str) {
        let _ = self.events.send(TransportEvent::Frame(json.as_bytes().to_vec()));
    }

    pub fn close(&self, code: Option<u16>) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Make every later send on this connection fail.
    pub fn fail_sends(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Text frames the client transmitted.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Close code the client used, if it closed this connection.
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

struct MockConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> TransportEvent {
        // A dropped peer goes quiet rather than closing.
        match self.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self, code: u16, _reason: &str) {
        *self.closed_with.lock().unwrap() = Some(code);
    }
}

enum Outcome {
    Open(MockConnection),
    Fail(TransportError),
}

/// Connector that replays queued outcomes; an empty queue fails every connect.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a successful connect and return its far end.
    pub fn push_open(&self) -> MockPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed_with = Arc::new(Mutex::new(None));
        let broken = Arc::new(AtomicBool::new(false));
        self.script.lock().unwrap().push_back(Outcome::Open(MockConnection {
            events: rx,
            sent: sent.clone(),
            closed_with: closed_with.clone(),
            broken: broken.clone(),
        }));
        MockPeer {
            events: tx,
            sent,
            closed_with,
            broken,
        }
    }

    pub fn push_failure(&self) {
        self.script
            .lock()
            .unwrap()
            .push_back(Outcome::Fail(TransportError::ConnectFailed("refused".into())));
    }

    /// Connect calls made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        match self.script.lock().unwrap().pop_front() {
            Some(Outcome::Open(conn)) => Ok(Box::new(conn)),
            Some(Outcome::Fail(e)) => Err(e),
            None => Err(TransportError::ConnectFailed("no scripted connection".into())),
        }
    }
}
