//! Coordinator error type.

use thiserror::Error;

/// Errors from the coordinator's sessions and round loop.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// A session write missed its deadline; the session is closed.
    #[error("session write deadline exceeded")]
    WriteDeadline,

    /// WebSocket-level failure.
    #[error("websocket: {0}")]
    WebSocket(String),

    /// Envelope (de)serialization failure.
    #[error(transparent)]
    Protocol(#[from] murmur_proto::ProtocolError),

    /// Socket-level failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for CoordinatorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
