//! The client round engine.
//!
//! One long-lived duplex session to the coordinator, authenticated by the
//! client's public key in the handshake URL. The engine keeps a per-round
//! handler map so every response is delivered to the handler that built
//! the matching request, even if the active handler changed between
//! rounds.
//!
//! A missed round is simply missed: errors from the coordinator are logged
//! and dropped, and the next `AnnounceConvoRound` resumes normal flow. A
//! write failure closes the session and surfaces to the caller of
//! [`Client::run`]; the engine never reconnects mid-round on its own.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{stream::SplitSink, SinkExt, StreamExt};
use murmur_crypto::PublicKey;
use murmur_proto::Envelope;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::error::ClientError;

/// Connect retry budget: up to 20 attempts, 100 ms apart.
const CONNECT_ATTEMPTS: usize = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-send write deadline.
const WRITE_WAIT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Builds requests and consumes responses, one round at a time.
pub trait ConvoHandler: Send + Sync {
    /// Build this round's submission. Called once per announced round.
    fn next_request(&self, round: u32) -> Envelope;

    /// Consume the reply onion for a round this handler built.
    fn handle_response(&self, round: u32, onion: Vec<u8>);
}

/// The round engine: session state plus handler routing.
pub struct Client {
    entry_server: String,
    my_public_key: PublicKey,
    handler: Mutex<Option<Arc<dyn ConvoHandler>>>,
    round_handlers: Mutex<HashMap<u32, Arc<dyn ConvoHandler>>>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
}

impl Client {
    /// Create an engine for the given entry server URL (e.g.
    /// `ws://host:33001`).
    pub fn new(entry_server: impl Into<String>, my_public_key: PublicKey) -> Self {
        Self {
            entry_server: entry_server.into(),
            my_public_key,
            handler: Mutex::new(None),
            round_handlers: Mutex::new(HashMap::new()),
            sink: tokio::sync::Mutex::new(None),
        }
    }

    /// Register the conversation handler. Until one is set, [`connect`]
    /// refuses.
    ///
    /// [`connect`]: Client::connect
    pub fn set_handler(&self, handler: Arc<dyn ConvoHandler>) {
        *self.handler.lock().unwrap_or_else(|p| p.into_inner()) = Some(handler);
    }

    /// Open the session, retrying with bounded backoff, and return the
    /// read half for [`Client::run`].
    ///
    /// # Errors
    ///
    /// - `ClientError::NoHandler` if no handler is registered.
    /// - `ClientError::ConnectFailed` once the retry budget is exhausted.
    pub async fn connect(&self) -> Result<futures::stream::SplitStream<WsStream>, ClientError> {
        if self.handler.lock().unwrap_or_else(|p| p.into_inner()).is_none() {
            return Err(ClientError::NoHandler);
        }

        let url = format!("{}/ws?publickey={}", self.entry_server, self.my_public_key.to_hex());

        let mut last_err = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    tracing::info!(entry = %self.entry_server, "connected to coordinator");
                    let (sink, stream) = ws.split();
                    *self.sink.lock().await = Some(sink);
                    return Ok(stream);
                }
                Err(err) => {
                    tracing::warn!(attempt, %err, "connecting to entry server failed, will retry");
                    last_err = err.to_string();
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }

        Err(ClientError::ConnectFailed { attempts: CONNECT_ATTEMPTS, detail: last_err })
    }

    /// Drive the read loop until the session ends.
    ///
    /// # Errors
    ///
    /// A write failure mid-round closes the session and is surfaced here.
    pub async fn run(
        &self,
        mut incoming: futures::stream::SplitStream<WsStream>,
    ) -> Result<(), ClientError> {
        while let Some(message) = incoming.next().await {
            let data = match message {
                Ok(Message::Binary(data)) => data,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    tracing::debug!(%err, "session read failed");
                    break;
                }
            };

            let envelope = match Envelope::decode(&data) {
                Ok(envelope) => envelope,
                Err(err) => {
                    tracing::error!(%err, "unparseable envelope from coordinator");
                    continue;
                }
            };

            self.handle_envelope(envelope).await?;
        }

        self.close().await;
        Ok(())
    }

    async fn handle_envelope(&self, envelope: Envelope) -> Result<(), ClientError> {
        match envelope {
            Envelope::AnnounceConvoRound { round } => {
                let Some(handler) = self
                    .handler
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .clone()
                else {
                    tracing::warn!(round, "round announced with no handler");
                    return Ok(());
                };

                self.round_handlers
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(round, Arc::clone(&handler));

                let request = handler.next_request(round);
                if let Err(err) = self.send(&request).await {
                    tracing::error!(round, %err, "failed to submit round, closing session");
                    self.close().await;
                    return Err(err);
                }
            }

            Envelope::ConvoResponse { round, onion } => {
                let handler = self
                    .round_handlers
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&round);
                match handler {
                    Some(handler) => handler.handle_response(round, onion),
                    None => tracing::error!(round, "round not found"),
                }
            }

            Envelope::ConvoError { round, err } => {
                tracing::warn!(round, %err, "round error");
                // Forget the pending handler; this round is lost.
                self.round_handlers
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&round);
            }

            Envelope::BadRequestError { err } => {
                tracing::warn!(%err, "bad request error");
            }

            other => {
                tracing::warn!("unexpected envelope from coordinator: {other:?}");
            }
        }
        Ok(())
    }

    /// Send one envelope under the write deadline.
    ///
    /// # Errors
    ///
    /// `ClientError::NotConnected`, `WriteDeadline`, or transport errors.
    /// Any error means the session is unusable.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let bytes = envelope.encode()?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(ClientError::NotConnected)?;

        tokio::time::timeout(WRITE_WAIT, sink.send(Message::Binary(bytes)))
            .await
            .map_err(|_| ClientError::WriteDeadline)??;
        Ok(())
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}
