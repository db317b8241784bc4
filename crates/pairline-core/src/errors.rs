use std::time::Duration;

/// Failures reported by the external pairing client.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    #[error("pairing client unavailable: {0}")]
    Unavailable(String),
    #[error("pairing client rejected the request: {0}")]
    Rejected(String),
    #[error("pairing client protocol error: {0}")]
    Protocol(String),
    #[error("pairing client timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

/// Errors surfaced to callers of `relay`.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    #[error("session is not ready to send")]
    SessionNotReady,
    #[error("invalid destination {0:?}: expected 8 to 15 digits")]
    InvalidDestination(String),
    #[error("message text is empty")]
    EmptyMessage,
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl RelayError {
    /// Short classification string for logging and responses.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::SessionNotReady => "session_not_ready",
            Self::InvalidDestination(_) => "invalid_destination",
            Self::EmptyMessage => "empty_message",
            Self::SendFailed(_) => "send_failed",
        }
    }
}

/// Session lifecycle failures. `TeardownFailed` is only ever logged.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start session: {0}")]
    StartFailed(#[source] ClientError),
    #[error("failed to tear down previous session: {0}")]
    TeardownFailed(#[source] ClientError),
}

/// A subscriber's transport could not take an event; the subscriber is dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("subscriber queue full")]
    QueueFull,
    #[error("subscriber closed")]
    Closed,
}
