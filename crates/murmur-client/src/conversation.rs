//! Conversation state: the [`ConvoHandler`] implementation.
//!
//! One conversation pairs this client with one peer. Per announced round
//! it takes at most one queued text message (or synthesizes timestamp
//! cover chatter), seals the peer box with the round/role nonce, derives
//! the dead drop, and onion-seals the exchange for the chain. Replies are
//! unpeeled with the kept hop keys; an unpeeled reply equal to the sent
//! ciphertext is an echo, meaning the peer did not write this round, except in
//! self-talk, where the echo *is* the message.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use murmur_crypto::{
    backward_nonce, box_open, box_seal, forward_nonce, onion_open_reply, onion_seal, peer_nonce,
    shared_key, DeadDrop, PrivateKey, PublicKey, Role, SharedKey,
};
use murmur_proto::{ConvoExchange, ConvoMessage, Envelope, SIZE_ENCRYPTED_MESSAGE};
use tokio::sync::mpsc;

use crate::{client::ConvoHandler, error::ClientError};

/// Bound on the outbound text queue; a full queue makes
/// [`Conversation::queue_message`] wait.
const OUT_QUEUE_CAPACITY: usize = 64;

/// A text message delivered from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// Peer name, for display.
    pub peer: String,
    /// Message text, NUL padding stripped.
    pub text: String,
}

/// Snapshot of conversation health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Did the peer's message arrive in the most recent completed round?
    pub peer_responding: bool,
    /// Last round this conversation built a request for.
    pub round: u32,
    /// One-way latency from the peer's last timestamp message, if any.
    pub latency: Option<Duration>,
}

struct PendingRound {
    shared_keys: Vec<SharedKey>,
    sent_ciphertext: [u8; SIZE_ENCRYPTED_MESSAGE],
}

#[derive(Default)]
struct ConvoState {
    last_round: u32,
    peer_responding: bool,
    latency: Option<Duration>,
}

/// One peer conversation.
pub struct Conversation {
    peer_name: String,
    my_public_key: PublicKey,
    peer_public_key: PublicKey,
    /// Precomputed peer box key; also feeds dead-drop derivation.
    peer_key: SharedKey,
    /// Mix public keys in chain order.
    server_keys: Vec<PublicKey>,

    out_tx: mpsc::Sender<Vec<u8>>,
    out_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    pending_rounds: Mutex<HashMap<u32, PendingRound>>,
    state: Mutex<ConvoState>,
    deliveries: mpsc::UnboundedSender<PeerMessage>,
}

impl Conversation {
    /// Create a conversation and the channel its deliveries arrive on.
    pub fn new(
        peer_name: impl Into<String>,
        my_private_key: &PrivateKey,
        peer_public_key: PublicKey,
        server_keys: Vec<PublicKey>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerMessage>) {
        let (out_tx, out_rx) = mpsc::channel(OUT_QUEUE_CAPACITY);
        let (deliveries, delivery_rx) = mpsc::unbounded_channel();

        let conversation = Self {
            peer_name: peer_name.into(),
            my_public_key: my_private_key.public_key(),
            peer_public_key,
            peer_key: shared_key(my_private_key, &peer_public_key),
            server_keys,
            out_tx,
            out_rx: Mutex::new(out_rx),
            pending_rounds: Mutex::new(HashMap::new()),
            state: Mutex::new(ConvoState::default()),
            deliveries,
        };
        (conversation, delivery_rx)
    }

    /// Self-talk: the peer is this client itself.
    pub fn solo(&self) -> bool {
        self.my_public_key == self.peer_public_key
    }

    /// Queue a text message, waiting if the queue is full.
    ///
    /// # Errors
    ///
    /// `ClientError::QueueClosed` if the conversation is gone.
    pub async fn queue_message(&self, text: Vec<u8>) -> Result<(), ClientError> {
        self.out_tx.send(text).await.map_err(|_| ClientError::QueueClosed)
    }

    /// Queue a text message without waiting.
    ///
    /// # Errors
    ///
    /// `ClientError::QueueFull` if all 64 slots are taken.
    pub fn try_queue_message(&self, text: Vec<u8>) -> Result<(), ClientError> {
        self.out_tx.try_send(text).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ClientError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => ClientError::QueueClosed,
        })
    }

    /// Current status snapshot.
    pub fn status(&self) -> Status {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Status {
            peer_responding: state.peer_responding,
            round: state.last_round,
            latency: state.latency,
        }
    }

    fn my_role(&self) -> Role {
        Role::mine(&self.my_public_key, &self.peer_public_key)
    }

    fn their_role(&self) -> Role {
        Role::theirs(&self.my_public_key, &self.peer_public_key)
    }

    fn dead_drop(&self, round: u32) -> DeadDrop {
        if self.solo() {
            DeadDrop::random(&mut rand::thread_rng())
        } else {
            DeadDrop::derive(&self.peer_key, round)
        }
    }

    fn mark_responding(&self, responding: bool) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).peer_responding = responding;
    }
}

impl ConvoHandler for Conversation {
    fn next_request(&self, round: u32) -> Envelope {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).last_round = round;

        // One queued text if available, otherwise timestamp cover chatter.
        let body = match self.out_rx.lock().unwrap_or_else(|p| p.into_inner()).try_recv() {
            Ok(text) => ConvoMessage::Text(text),
            Err(_) => ConvoMessage::Timestamp(unix_now()),
        };

        let plaintext = body.marshal();
        let sealed = box_seal(&self.peer_key, &peer_nonce(round, self.my_role()), &plaintext);

        let exchange = ConvoExchange::new(self.dead_drop(round), &sealed)
            .unwrap_or_else(|_| unreachable!("sealed message length is fixed by construction"));

        let (onion, shared_keys) = onion_seal(
            &exchange.marshal(),
            &forward_nonce(round),
            &self.server_keys,
            &mut rand::thread_rng(),
        );

        self.pending_rounds.lock().unwrap_or_else(|p| p.into_inner()).insert(
            round,
            PendingRound { shared_keys, sent_ciphertext: exchange.encrypted_message },
        );

        Envelope::ConvoRequest { round, onion }
    }

    fn handle_response(&self, round: u32, onion: Vec<u8>) {
        let pending = self
            .pending_rounds
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&round);
        let Some(pending) = pending else {
            tracing::error!(round, "round not found");
            return;
        };

        let Ok(encrypted) = onion_open_reply(&onion, &backward_nonce(round), &pending.shared_keys)
        else {
            tracing::error!(round, "decrypting onion failed");
            self.mark_responding(false);
            return;
        };

        // An echo of our own ciphertext means nobody met us at the drop.
        // In self-talk the echo is the expected reply and flows on.
        if encrypted.as_slice() == pending.sent_ciphertext.as_slice() && !self.solo() {
            self.mark_responding(false);
            return;
        }

        let Ok(plaintext) =
            box_open(&self.peer_key, &peer_nonce(round, self.their_role()), &encrypted)
        else {
            tracing::error!(round, "decrypting peer message failed");
            self.mark_responding(false);
            return;
        };

        let message = match ConvoMessage::unmarshal(&plaintext) {
            Ok(message) => message,
            Err(err) => {
                tracing::error!(round, %err, "unmarshaling peer message failed");
                self.mark_responding(false);
                return;
            }
        };

        match message {
            ConvoMessage::Timestamp(sent_at) => {
                let latency = Duration::from_secs(unix_now().saturating_sub(sent_at).max(0) as u64);
                let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
                state.latency = Some(latency);
                state.peer_responding = true;
            }
            ConvoMessage::Text(body) => {
                let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                let text = String::from_utf8_lossy(&body[..end]).into_owned();
                let _ = self.deliveries.send(PeerMessage { peer: self.peer_name.clone(), text });
                self.mark_responding(true);
            }
        }
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
