use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::handle::Handle;
use crate::value::{PayloadError, ValueKind};

/// Failure reported by a window/session implementation. The message is
/// propagated verbatim into the engine's last-error slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SessionError {
    message: String,
}

impl SessionError {
    pub fn new(message: impl Into<String>) -> Self {
        SessionError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Fixed text used for every timeout failure.
pub const TIMEOUT_MESSAGE: &str = "timed out waiting for the visualization thread";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine failed to start: {0}")]
    Startup(String),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("timed out waiting for the visualization thread")]
    Timeout,
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    #[error("no window handles left")]
    HandlesExhausted,
    #[error("variable type {kind} is not supported by {operation}")]
    UnsupportedPayload {
        operation: &'static str,
        kind: ValueKind,
    },
    #[error("{0}")]
    Session(String),
    #[error("{operation} panicked on the visualization thread: {message}")]
    Panicked {
        operation: &'static str,
        message: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unexpected reply to {operation}: {reply}")]
    UnexpectedReply {
        operation: &'static str,
        reply: String,
    },
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        EngineError::Session(err.message)
    }
}

impl From<PayloadError> for EngineError {
    fn from(err: PayloadError) -> Self {
        EngineError::InvalidArgument(err.to_string())
    }
}

/// Single last-error string shared between the owner thread and callers.
/// Reads take the lock so they never observe a half-written message.
#[derive(Debug, Clone, Default)]
pub struct LastError {
    slot: Arc<Mutex<String>>,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, err: &EngineError) {
        *self.slot.lock() = err.to_string();
    }

    pub fn get(&self) -> String {
        self.slot.lock().clone()
    }

    pub fn clear(&self) {
        self.slot.lock().clear();
    }
}
