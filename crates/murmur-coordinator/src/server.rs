//! The coordinator proper: session accept loop and round loop.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::{stream, StreamExt};
use murmur_crypto::PublicKey;
use murmur_mix::NextHop;
use murmur_proto::Envelope;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{Method, StatusCode};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    error::CoordinatorError,
    round::{RoundBatch, RoundLedger, SessionId, SubmitError},
    session::Session,
};

/// Backoff after a failed `NewConvoRound` before retrying the same round.
const NEW_ROUND_RETRY: Duration = Duration::from_secs(10);

/// Concurrency bound for broadcasts and reply fan-out.
const FANOUT_PARALLELISM: usize = 64;

/// Runtime parameters for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a round stays open for submissions after the announce.
    pub receive_wait: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { receive_wait: Duration::from_secs(1) }
    }
}

/// Entry coordinator state shared by the accept loop, the per-session read
/// tasks, and the round loop.
pub struct Coordinator {
    head: Box<dyn NextHop>,
    config: CoordinatorConfig,
    ledger: Mutex<RoundLedger>,
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    next_session_id: AtomicU64,
}

impl Coordinator {
    /// Create a coordinator talking to the given chain head.
    pub fn new(head: Box<dyn NextHop>, config: CoordinatorConfig) -> Arc<Self> {
        Arc::new(Self {
            head,
            config,
            ledger: Mutex::new(RoundLedger::new()),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Run the accept loop and the round loop until the listener fails.
    ///
    /// # Errors
    ///
    /// Only listener-level failures escape.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), CoordinatorError> {
        let round_loop = Arc::clone(&self);
        tokio::spawn(async move { round_loop.round_loop().await });

        loop {
            let (stream, peer) = listener.accept().await?;
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.accept_session(stream).await {
                    tracing::debug!(%peer, %err, "session ended");
                }
            });
        }
    }

    /// The dedicated round task: announce, wait, freeze, run off-path.
    async fn round_loop(self: Arc<Self>) {
        loop {
            let round = self.ledger.lock().unwrap_or_else(|p| p.into_inner()).current();

            if let Err(err) = self.head.new_round(round).await {
                tracing::error!(round, %err, "NewConvoRound failed, retrying");
                tokio::time::sleep(NEW_ROUND_RETRY).await;
                continue;
            }

            tracing::info!(round, "announcing round");
            self.broadcast(self.all_sessions(), &Envelope::AnnounceConvoRound { round }).await;

            tokio::time::sleep(self.config.receive_wait).await;

            let batch = self.ledger.lock().unwrap_or_else(|p| p.into_inner()).freeze();

            // Off the critical path: the next round's announce never waits
            // for this round's chain call.
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.run_convo_round(batch).await });
        }
    }

    /// Ship a frozen batch to the chain head and dispatch the replies
    /// positionally.
    async fn run_convo_round(&self, batch: RoundBatch) {
        let round = batch.round;
        let (session_ids, onions): (Vec<SessionId>, Vec<Vec<u8>>) =
            batch.submissions.into_iter().map(|s| (s.session, s.onion)).unzip();

        tracing::info!(round, onions = onions.len(), "running round");

        let replies = match self.head.run_round(round, onions).await {
            Ok(replies) => replies,
            Err(err) => {
                tracing::error!(round, %err, "RunConvoRound failed");
                let contributors: Vec<Arc<Session>> = {
                    let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
                    session_ids.iter().filter_map(|id| sessions.get(id).cloned()).collect()
                };
                let envelope =
                    Envelope::ConvoError { round, err: "server error".to_string() };
                self.broadcast(contributors, &envelope).await;
                return;
            }
        };

        tracing::info!(round, replies = replies.len(), "round succeeded");

        // reply[i] belongs to the session at submission index i. Sessions
        // that closed mid-round are skipped; their reply is garbage to
        // anyone else anyway.
        stream::iter(replies.into_iter().zip(session_ids))
            .for_each_concurrent(FANOUT_PARALLELISM, |(onion, session_id)| async move {
                let session = {
                    let sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
                    sessions.get(&session_id).cloned()
                };
                let Some(session) = session else { return };

                let envelope = Envelope::ConvoResponse { round, onion };
                if session.send(&envelope).await.is_err() {
                    self.drop_session(session_id).await;
                }
            })
            .await;
    }

    /// Upgrade one TCP stream to a session and run its read loop.
    async fn accept_session(self: &Arc<Self>, stream: TcpStream) -> Result<(), CoordinatorError> {
        let mut public_key: Option<PublicKey> = None;
        let callback = |request: &Request, response: Response| match validate_handshake(request) {
            Ok(key) => {
                public_key = Some(key);
                Ok(response)
            }
            Err(refusal) => Err(refusal),
        };

        let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let Some(public_key) = public_key else {
            // The callback rejected; accept_hdr_async already returned Err.
            return Ok(());
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (sink, mut incoming) = ws.split();
        let session = Arc::new(Session::new(id, public_key, sink));

        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, Arc::clone(&session));
        tracing::info!(session = id, key = %public_key, "session connected");

        while let Some(message) = incoming.next().await {
            match message {
                Ok(Message::Binary(data)) => self.handle_frame(&session, &data),
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // text/ping/pong are ignored
                Err(err) => {
                    tracing::debug!(session = id, %err, "read failed");
                    break;
                }
            }
        }

        self.drop_session(id).await;
        tracing::info!(session = id, "session disconnected");
        Ok(())
    }

    /// Parse and route one frame from a client.
    fn handle_frame(self: &Arc<Self>, session: &Arc<Session>, data: &[u8]) {
        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(err) => {
                let reply = Envelope::BadRequestError {
                    err: format!("error parsing request: {err}"),
                };
                self.send_off_path(session, reply);
                return;
            }
        };

        match envelope {
            Envelope::ConvoRequest { round, onion } => {
                let result = self
                    .ledger
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .submit(session.id, round, onion);

                match result {
                    Ok(()) => {}
                    Err(SubmitError::WrongRound { current }) => {
                        let reply = Envelope::ConvoError {
                            round,
                            err: format!("wrong round (currently {current})"),
                        };
                        self.send_off_path(session, reply);
                    }
                    Err(SubmitError::Duplicate) => {
                        tracing::debug!(session = session.id, round, "duplicate submission");
                    }
                }
            }
            other => {
                tracing::warn!(session = session.id, "unexpected envelope: {other:?}");
                let reply = Envelope::BadRequestError {
                    err: "unexpected envelope variant".to_string(),
                };
                self.send_off_path(session, reply);
            }
        }
    }

    /// Send without blocking the read loop; failures close the session.
    fn send_off_path(self: &Arc<Self>, session: &Arc<Session>, envelope: Envelope) {
        let this = Arc::clone(self);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            if session.send(&envelope).await.is_err() {
                this.drop_session(session.id).await;
            }
        });
    }

    /// Broadcast to the given sessions with bounded parallelism. A failed
    /// slot closes its session but never stalls the round.
    async fn broadcast(&self, sessions: Vec<Arc<Session>>, envelope: &Envelope) {
        stream::iter(sessions)
            .for_each_concurrent(FANOUT_PARALLELISM, |session| async move {
                if session.send(envelope).await.is_err() {
                    self.drop_session(session.id).await;
                }
            })
            .await;
    }

    fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Invalidate a session handle and close its socket.
    async fn drop_session(&self, id: SessionId) {
        let session = self.sessions.lock().unwrap_or_else(|p| p.into_inner()).remove(&id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    /// Number of connected sessions; used by tests.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Validate a session handshake: `GET /ws?publickey=<hex 32-byte key>`.
///
/// Any method other than GET is answered 405; a bad path or a missing or
/// malformed key is answered 400.
fn validate_handshake(request: &Request) -> Result<PublicKey, ErrorResponse> {
    if request.method() != Method::GET {
        return Err(refusal(StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string()));
    }

    session_key_from_request(request)
        .map_err(|detail| refusal(StatusCode::BAD_REQUEST, detail))
}

/// Extract the client public key from the handshake request URI.
fn session_key_from_request(request: &Request) -> Result<PublicKey, String> {
    if request.uri().path() != "/ws" {
        return Err(format!("unknown path: {}", request.uri().path()));
    }

    let query = request.uri().query().unwrap_or("");
    let raw = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("publickey="))
        .ok_or_else(|| "expecting box key in publickey query parameter".to_string())?;

    PublicKey::from_hex(raw).map_err(|err| format!("bad public key: {err}"))
}

/// HTTP error response aborting a handshake.
fn refusal(status: StatusCode, detail: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(detail));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn extracts_valid_session_key() {
        let key = murmur_crypto::KeyPair::generate(&mut rand::thread_rng()).public;
        let request = get(&format!("/ws?publickey={}", key.to_hex()));
        assert_eq!(validate_handshake(&request).unwrap(), key);
    }

    #[test]
    fn rejects_bad_handshakes_with_400() {
        for uri in ["/ws", "/ws?publickey=nothex", "/other?publickey=aa"] {
            let refusal = validate_handshake(&get(uri)).unwrap_err();
            assert_eq!(refusal.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
        }
    }

    #[test]
    fn rejects_non_get_with_405() {
        let key = murmur_crypto::KeyPair::generate(&mut rand::thread_rng()).public;
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::HEAD] {
            let request = Request::builder()
                .method(method.clone())
                .uri(format!("/ws?publickey={}", key.to_hex()))
                .body(())
                .unwrap();

            let refusal = validate_handshake(&request).unwrap_err();
            assert_eq!(refusal.status(), StatusCode::METHOD_NOT_ALLOWED, "method: {method}");
        }
    }
}
