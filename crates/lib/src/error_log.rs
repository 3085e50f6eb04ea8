//! Application error log: classified error records with user-facing guidance.
//!
//! Constructed explicitly and shared as `Arc<ErrorLog>` between the client
//! facade and its supervisor task. Bounded: once it holds more than
//! [`MAX_ENTRIES`] records only the newest [`RETAINED_ENTRIES`] are kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Above this many records the log is trimmed.
pub const MAX_ENTRIES: usize = 100;

/// Number of newest records kept after a trim.
pub const RETAINED_ENTRIES: usize = 50;

/// Numeric error classification. Codes group by thousand: 1xxx network,
/// 2xxx connection, 3xxx files, 4xxx protocol, 5xxx validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ErrorCode {
    Network,
    NetworkUnreachable,
    NetworkTimeout,
    Connection,
    ConnectionLost,
    NormalClosure,
    ReconnectExhausted,
    File,
    FileTooLarge,
    FileTypeUnsupported,
    Protocol,
    ServerError,
    Validation,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::Network => 1000,
            ErrorCode::NetworkUnreachable => 1001,
            ErrorCode::NetworkTimeout => 1002,
            ErrorCode::Connection => 2000,
            ErrorCode::ConnectionLost => 2001,
            ErrorCode::NormalClosure => 2002,
            ErrorCode::ReconnectExhausted => 2003,
            ErrorCode::File => 3000,
            ErrorCode::FileTooLarge => 3001,
            ErrorCode::FileTypeUnsupported => 3002,
            ErrorCode::Protocol => 4000,
            ErrorCode::ServerError => 4001,
            ErrorCode::Validation => 5000,
        }
    }

    /// Guidance shown to the end user for this class of error.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCode::Network => "Something went wrong. Reload the page or restart the client.",
            ErrorCode::NetworkUnreachable => "Check your network connection.",
            ErrorCode::NetworkTimeout => "The server is responding slowly. Try again shortly.",
            ErrorCode::Connection => "There is a problem with the connection. Try again.",
            ErrorCode::ConnectionLost => "Connection to the server was lost. Reconnecting.",
            ErrorCode::NormalClosure => "The connection was closed.",
            ErrorCode::ReconnectExhausted => {
                "Could not reconnect to the server. Reload or use /reconnect to try again."
            }
            ErrorCode::File => "File upload failed. Try again.",
            ErrorCode::FileTooLarge => "Choose a smaller file.",
            ErrorCode::FileTypeUnsupported => "Use a supported file type.",
            ErrorCode::Protocol => "The server sent something unexpected. It was ignored.",
            ErrorCode::ServerError => "The server reported an error.",
            ErrorCode::Validation => "Nothing to send.",
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            1000 => ErrorCode::Network,
            1001 => ErrorCode::NetworkUnreachable,
            1002 => ErrorCode::NetworkTimeout,
            2000 => ErrorCode::Connection,
            2001 => ErrorCode::ConnectionLost,
            2002 => ErrorCode::NormalClosure,
            2003 => ErrorCode::ReconnectExhausted,
            3000 => ErrorCode::File,
            3001 => ErrorCode::FileTooLarge,
            3002 => ErrorCode::FileTypeUnsupported,
            4000 => ErrorCode::Protocol,
            4001 => ErrorCode::ServerError,
            5000 => ErrorCode::Validation,
            other => return Err(format!("unknown error code {}", other)),
        };
        Ok(code)
    }
}

/// One recorded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AppError {
    /// What to show an end user for this entry.
    pub fn user_message(&self) -> &'static str {
        self.code.user_message()
    }
}

/// Bounded in-memory error log.
#[derive(Debug, Default)]
pub struct ErrorLog {
    entries: Mutex<Vec<AppError>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error and log it. Returns the stored record.
    pub fn record(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
        details: Option<String>,
    ) -> AppError {
        let entry = AppError {
            code,
            message: message.into(),
            details,
            timestamp: Utc::now(),
        };
        match &entry.details {
            Some(d) => log::debug!("error {}: {} ({})", code.as_u16(), entry.message, d),
            None => log::debug!("error {}: {}", code.as_u16(), entry.message),
        }
        let mut g = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        g.push(entry.clone());
        if g.len() > MAX_ENTRIES {
            let excess = g.len() - RETAINED_ENTRIES;
            g.drain(..excess);
        }
        entry
    }

    /// Snapshot of the recorded errors, oldest first.
    pub fn entries(&self) -> Vec<AppError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Most recent record, if any.
    pub fn last(&self) -> Option<AppError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_u16() {
        for code in [
            ErrorCode::Network,
            ErrorCode::ConnectionLost,
            ErrorCode::ReconnectExhausted,
            ErrorCode::FileTooLarge,
            ErrorCode::ServerError,
            ErrorCode::Validation,
        ] {
            assert_eq!(ErrorCode::try_from(code.as_u16()), Ok(code));
        }
        assert!(ErrorCode::try_from(9999).is_err());
    }

    #[test]
    fn log_trims_to_newest_entries_when_over_capacity() {
        let log = ErrorLog::new();
        for i in 0..=MAX_ENTRIES {
            log.record(ErrorCode::Protocol, format!("e{}", i), None);
        }
        let entries = log.entries();
        assert_eq!(entries.len(), RETAINED_ENTRIES);
        assert_eq!(entries.last().unwrap().message, format!("e{}", MAX_ENTRIES));
        assert_eq!(
            entries.first().unwrap().message,
            format!("e{}", MAX_ENTRIES + 1 - RETAINED_ENTRIES)
        );
    }

    #[test]
    fn exhausted_reconnect_guidance_asks_for_manual_action() {
        let log = ErrorLog::new();
        let entry = log.record(ErrorCode::ReconnectExhausted, String::from("gave up"), None);
        assert!(entry.user_message().contains("/reconnect"));
        assert_eq!(entry.user_message(), ErrorCode::ReconnectExhausted.user_message());
    }

    #[test]
    fn clear_empties_the_log() {
        let log = ErrorLog::new();
        log.record(ErrorCode::Validation, "empty message", None);
        assert_eq!(log.len(), 1);
        log.clear();
        assert!(log.is_empty());
        assert!(log.last().is_none());
    }

    #[test]
    fn serializes_code_as_number() {
        let log = ErrorLog::new();
        let e = log.record(ErrorCode::ConnectionLost, "lost", Some("code 1006".into()));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["code"], 2001);
        assert_eq!(v["details"], "code 1006");
    }
}
