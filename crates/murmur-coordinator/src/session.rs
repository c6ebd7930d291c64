//! One connected client session.
//!
//! The read half lives in the coordinator's per-session task; this type
//! owns the write half. Writes are serialized behind the sink lock and
//! bounded by a 10-second deadline. A session that cannot drain its
//! socket is closed rather than allowed to stall a broadcast slot.

use std::time::Duration;

use futures::{stream::SplitSink, SinkExt};
use murmur_crypto::PublicKey;
use murmur_proto::Envelope;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

use crate::{error::CoordinatorError, round::SessionId};

/// Per-send write deadline.
const WRITE_WAIT: Duration = Duration::from_secs(10);

/// A client session's write side.
pub struct Session {
    /// Opaque handle used by the round ledger.
    pub id: SessionId,
    /// Key presented in the handshake query string.
    pub public_key: PublicKey,
    sink: tokio::sync::Mutex<SplitSink<WebSocketStream<TcpStream>, Message>>,
}

impl Session {
    /// Wrap the write half of an accepted WebSocket.
    pub fn new(
        id: SessionId,
        public_key: PublicKey,
        sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    ) -> Self {
        Self { id, public_key, sink: tokio::sync::Mutex::new(sink) }
    }

    /// Send one envelope, serialized with other writers on this session.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::WriteDeadline` if the socket does not accept
    ///   the frame within 10 seconds.
    /// - `CoordinatorError::WebSocket` on a transport failure.
    ///
    /// Either error means the session should be closed by the caller.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), CoordinatorError> {
        let bytes = envelope.encode()?;

        let mut sink = self.sink.lock().await;
        tokio::time::timeout(WRITE_WAIT, sink.send(Message::Binary(bytes)))
            .await
            .map_err(|_| CoordinatorError::WriteDeadline)??;
        Ok(())
    }

    /// Close the write half. Best-effort; the peer may already be gone.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.close().await;
    }
}
