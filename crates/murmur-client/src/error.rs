//! Client error type.

use thiserror::Error;

/// Errors from the client round engine.
#[derive(Error, Debug)]
pub enum ClientError {
    /// `connect` was called before a handler was registered.
    #[error("no conversation handler set")]
    NoHandler,

    /// The coordinator could not be reached within the retry budget.
    #[error("connecting to entry server failed after {attempts} attempts: {detail}")]
    ConnectFailed {
        /// Attempts made.
        attempts: usize,
        /// Last underlying error.
        detail: String,
    },

    /// The session is not connected (or was closed after a write failure).
    #[error("not connected")]
    NotConnected,

    /// A session write missed its deadline.
    #[error("session write deadline exceeded")]
    WriteDeadline,

    /// WebSocket-level failure.
    #[error("websocket: {0}")]
    WebSocket(String),

    /// The bounded outbound queue is full (`try_queue_message` only).
    #[error("outbound queue full")]
    QueueFull,

    /// The outbound queue was closed.
    #[error("outbound queue closed")]
    QueueClosed,

    /// Envelope (de)serialization failure.
    #[error(transparent)]
    Protocol(#[from] murmur_proto::ProtocolError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
