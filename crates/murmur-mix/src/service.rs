//! The per-round pipeline executor.
//!
//! One [`ConvoService`] instance runs per mix. Rounds serialize behind an
//! idle gate: at most one round is in flight per mix, and rounds execute in
//! the order their `RunConvoRound` calls acquire the gate.
//!
//! Forward pass (non-tail): peel every onion, replace unpeelable slots
//! with zero placeholders so batch size is preserved, append
//! Laplace-many cover onions of the peeled size, apply a uniform random
//! permutation, forward. Reverse pass: invert the permutation, drop the
//! covers, seal one reply layer per slot with the key recorded at peel
//! time. The tail performs the dead-drop exchange instead of forwarding.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use murmur_crypto::{
    backward_nonce, forward_nonce, onion_peel, onion_seal_reply, Laplace, PrivateKey, SharedKey,
    ONION_OVERHEAD, REPLY_OVERHEAD,
};
use murmur_proto::{ConvoExchange, SIZE_ENCRYPTED_MESSAGE, SIZE_EXCHANGE};
use rand::{seq::SliceRandom, RngCore};

use crate::{error::MixError, link::NextHop};

/// Upper bound on tracked round lifecycle entries. Rounds are transient;
/// anything older than the window is garbage from a failed or replayed
/// call and gets evicted oldest-first.
const MAX_TRACKED_ROUNDS: usize = 64;

/// Static parameters for one mix.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Server name, for logging.
    pub server_name: String,
    /// Cover-count distribution shared by the whole chain.
    pub laplace: Laplace,
    /// Number of mixes after this one; 0 makes this the tail. Fixes the
    /// expected onion size at this hop.
    pub hops_after: usize,
}

/// Round lifecycle, tracked for `NewConvoRound` idempotency and replay
/// rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundPhase {
    Announced,
    Done,
}

#[derive(Default)]
struct RoundTable {
    phases: HashMap<u32, RoundPhase>,
    order: VecDeque<u32>,
}

impl RoundTable {
    fn announce(&mut self, round: u32) {
        if self.phases.contains_key(&round) {
            return;
        }
        self.insert(round, RoundPhase::Announced);
    }

    fn phase(&self, round: u32) -> Option<RoundPhase> {
        self.phases.get(&round).copied()
    }

    fn complete(&mut self, round: u32) {
        if self.phases.insert(round, RoundPhase::Done).is_none() {
            self.order.push_back(round);
            self.evict();
        }
    }

    fn insert(&mut self, round: u32, phase: RoundPhase) {
        self.phases.insert(round, phase);
        self.order.push_back(round);
        self.evict();
    }

    fn evict(&mut self) {
        while self.order.len() > MAX_TRACKED_ROUNDS {
            if let Some(oldest) = self.order.pop_front() {
                self.phases.remove(&oldest);
            }
        }
    }
}

/// The mix's round service: peel, pad, shuffle, exchange or forward.
pub struct ConvoService {
    config: ServiceConfig,
    private_key: PrivateKey,
    next: Option<Box<dyn NextHop>>,
    /// Single-slot gate serializing rounds within this mix.
    idle: tokio::sync::Mutex<()>,
    rounds: Mutex<RoundTable>,
}

impl ConvoService {
    /// Create a service. `next` is `None` for the tail mix.
    pub fn new(config: ServiceConfig, private_key: PrivateKey, next: Option<Box<dyn NextHop>>) -> Self {
        Self {
            config,
            private_key,
            next,
            idle: tokio::sync::Mutex::new(()),
            rounds: Mutex::new(RoundTable::default()),
        }
    }

    /// Whether this mix is the chain tail.
    pub fn is_tail(&self) -> bool {
        self.next.is_none()
    }

    /// Expected size of an incoming onion at this hop.
    pub fn expected_onion_len(&self) -> usize {
        SIZE_EXCHANGE + ONION_OVERHEAD * (self.config.hops_after + 1)
    }

    /// Announce a round. Idempotent; called by the chain head. Intermediate
    /// mixes also accept a round implicitly at its first `run_round`.
    pub async fn new_round(&self, round: u32) -> Result<(), MixError> {
        self.rounds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .announce(round);
        tracing::debug!(server = %self.config.server_name, round, "round announced");
        Ok(())
    }

    /// Execute the forward and reverse pipeline for one round.
    ///
    /// On success the returned batch has exactly `onions.len()` replies, in
    /// the caller's submission order.
    ///
    /// # Errors
    ///
    /// - `MixError::RoundReplayed` if this round already completed here.
    /// - Link errors if the next hop fails; the round is abandoned but the
    ///   mix stays healthy.
    pub async fn run_round(&self, round: u32, onions: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MixError> {
        let _idle = self.idle.lock().await;

        {
            let table = self.rounds.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if table.phase(round) == Some(RoundPhase::Done) {
                return Err(MixError::RoundReplayed { round });
            }
        }

        let n_real = onions.len();
        tracing::info!(
            server = %self.config.server_name,
            round,
            onions = n_real,
            "running round"
        );

        let (peeled, shared_keys) = self.peel_batch(round, onions);

        let inner_replies = match &self.next {
            Some(next) => self.forward_round(next.as_ref(), round, peeled).await?,
            None => exchange(peeled, &shared_keys),
        };

        debug_assert_eq!(inner_replies.len(), n_real);
        let replies = self.seal_replies(round, inner_replies, &shared_keys);

        self.rounds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .complete(round);

        Ok(replies)
    }

    /// Peel every onion in the batch. Unpeelable slots become zero
    /// placeholders with no shared key; their eventual replies are
    /// indistinguishable from network loss to the submitting client.
    fn peel_batch(
        &self,
        round: u32,
        onions: Vec<Vec<u8>>,
    ) -> (Vec<Vec<u8>>, Vec<Option<SharedKey>>) {
        let nonce = forward_nonce(round);
        let expected = self.expected_onion_len();
        let peeled_size = expected - ONION_OVERHEAD;

        let mut peeled = Vec::with_capacity(onions.len());
        let mut keys = Vec::with_capacity(onions.len());

        for (slot, onion) in onions.into_iter().enumerate() {
            if onion.len() != expected {
                tracing::warn!(
                    server = %self.config.server_name,
                    round,
                    slot,
                    len = onion.len(),
                    expected,
                    "onion has wrong size, dropping slot"
                );
                peeled.push(vec![0u8; peeled_size]);
                keys.push(None);
                continue;
            }

            match onion_peel(&onion, &nonce, &self.private_key) {
                Ok((inner, key)) => {
                    peeled.push(inner);
                    keys.push(Some(key));
                }
                Err(err) => {
                    // Covers injected by upstream hops always land here.
                    tracing::debug!(
                        server = %self.config.server_name,
                        round,
                        slot,
                        %err,
                        "onion failed to peel, dropping slot"
                    );
                    peeled.push(vec![0u8; peeled_size]);
                    keys.push(None);
                }
            }
        }

        (peeled, keys)
    }

    /// Non-tail forward pass: pad with covers, permute, forward, then
    /// invert the permutation and strip the covers from the reply batch.
    async fn forward_round(
        &self,
        next: &dyn NextHop,
        round: u32,
        mut batch: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, MixError> {
        let n_real = batch.len();
        let peeled_size = self.expected_onion_len() - ONION_OVERHEAD;

        // All randomness happens before the await: sample the cover count,
        // generate the covers, and draw the permutation.
        let permutation = {
            let mut rng = rand::thread_rng();

            let cover_count = self.config.laplace.sample(&mut rng);
            tracing::debug!(
                server = %self.config.server_name,
                round,
                covers = cover_count,
                "injecting cover onions"
            );
            for _ in 0..cover_count {
                let mut cover = vec![0u8; peeled_size];
                rng.fill_bytes(&mut cover);
                batch.push(cover);
            }

            let mut permutation: Vec<usize> = (0..batch.len()).collect();
            permutation.shuffle(&mut rng);
            permutation
        };

        let forwarded: Vec<Vec<u8>> =
            permutation.iter().map(|&i| std::mem::take(&mut batch[i])).collect();
        let sent = forwarded.len();

        let replies = next.run_round(round, forwarded).await?;
        if replies.len() != sent {
            return Err(MixError::ReplyCountMismatch { sent, got: replies.len() });
        }

        // Invert the permutation, restoring [real slots..., covers...],
        // then drop the covers.
        let mut restored: Vec<Vec<u8>> = vec![Vec::new(); replies.len()];
        for (j, reply) in replies.into_iter().enumerate() {
            restored[permutation[j]] = reply;
        }
        restored.truncate(n_real);

        Ok(restored)
    }

    /// Seal one reply layer per slot. Slots without a shared key get
    /// uniformly random bytes of the same length.
    fn seal_replies(
        &self,
        round: u32,
        inner: Vec<Vec<u8>>,
        keys: &[Option<SharedKey>],
    ) -> Vec<Vec<u8>> {
        let nonce = backward_nonce(round);
        let mut rng = rand::thread_rng();

        inner
            .into_iter()
            .zip(keys)
            .map(|(reply, key)| match key {
                Some(key) => onion_seal_reply(key, &nonce, &reply),
                None => {
                    let mut junk = vec![0u8; reply.len() + REPLY_OVERHEAD];
                    rng.fill_bytes(&mut junk);
                    junk
                }
            })
            .collect()
    }
}

/// The tail's dead-drop exchange.
///
/// Slots are grouped by drop identifier. Exactly two slots on one drop
/// swap their encrypted messages; a singleton passes through unchanged;
/// three or more pass through unchanged (someone's round is wasted, but
/// nothing leaks) and are counted in the log. Slots that failed to peel
/// earlier take no part and yield zeroes, replaced by random bytes when
/// the reply is sealed.
fn exchange(slots: Vec<Vec<u8>>, keys: &[Option<SharedKey>]) -> Vec<Vec<u8>> {
    let mut parsed: Vec<Option<ConvoExchange>> = slots
        .iter()
        .zip(keys)
        .map(|(slot, key)| match key {
            Some(_) => ConvoExchange::unmarshal(slot).ok(),
            None => None,
        })
        .collect();

    let mut by_drop: HashMap<[u8; 16], Vec<usize>> = HashMap::new();
    for (i, ex) in parsed.iter().enumerate() {
        if let Some(ex) = ex {
            by_drop.entry(*ex.dead_drop.as_bytes()).or_default().push(i);
        }
    }

    let mut collisions = 0usize;
    for indices in by_drop.values() {
        match indices.as_slice() {
            [a, b] => {
                let msg_a = parsed[*a]
                    .as_ref()
                    .map(|ex| ex.encrypted_message)
                    .unwrap_or_else(|| unreachable!("grouped indices point at parsed slots"));
                let msg_b = parsed[*b]
                    .as_ref()
                    .map(|ex| ex.encrypted_message)
                    .unwrap_or_else(|| unreachable!("grouped indices point at parsed slots"));
                if let Some(ex) = parsed[*a].as_mut() {
                    ex.encrypted_message = msg_b;
                }
                if let Some(ex) = parsed[*b].as_mut() {
                    ex.encrypted_message = msg_a;
                }
            }
            [_] => {}
            many => collisions += many.len(),
        }
    }
    if collisions > 0 {
        tracing::warn!(slots = collisions, "dead-drop collision of three or more onions");
    }

    parsed
        .into_iter()
        .map(|ex| match ex {
            Some(ex) => ex.encrypted_message.to_vec(),
            None => vec![0u8; SIZE_ENCRYPTED_MESSAGE],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::{onion_open_reply, onion_seal, shared_key, DeadDrop, KeyPair};

    fn tail_service(laplace: Laplace) -> (ConvoService, KeyPair) {
        let keys = KeyPair::generate(&mut rand::thread_rng());
        let config = ServiceConfig {
            server_name: "tail".to_string(),
            laplace,
            hops_after: 0,
        };
        (ConvoService::new(config, keys.private.clone(), None), keys)
    }

    fn sealed_exchange(
        drop: DeadDrop,
        message: &[u8; SIZE_ENCRYPTED_MESSAGE],
        round: u32,
        server: &KeyPair,
    ) -> (Vec<u8>, Vec<SharedKey>) {
        let ex = ConvoExchange { dead_drop: drop, encrypted_message: *message };
        onion_seal(
            &ex.marshal(),
            &forward_nonce(round),
            &[server.public],
            &mut rand::thread_rng(),
        )
    }

    #[tokio::test]
    async fn tail_swaps_matching_drops() {
        let (service, server) = tail_service(Laplace { mu: 0.0, b: 0.0 });

        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let drop = DeadDrop::derive(&shared_key(&a.private, &b.public), 1);

        let msg_a = [0xAAu8; SIZE_ENCRYPTED_MESSAGE];
        let msg_b = [0xBBu8; SIZE_ENCRYPTED_MESSAGE];
        let (onion_a, keys_a) = sealed_exchange(drop, &msg_a, 1, &server);
        let (onion_b, keys_b) = sealed_exchange(drop, &msg_b, 1, &server);

        let replies = service.run_round(1, vec![onion_a, onion_b]).await.unwrap();
        assert_eq!(replies.len(), 2);

        let opened_a = onion_open_reply(&replies[0], &backward_nonce(1), &keys_a).unwrap();
        let opened_b = onion_open_reply(&replies[1], &backward_nonce(1), &keys_b).unwrap();
        assert_eq!(opened_a, msg_b.to_vec());
        assert_eq!(opened_b, msg_a.to_vec());
    }

    #[tokio::test]
    async fn singleton_drop_echoes() {
        let (service, server) = tail_service(Laplace { mu: 0.0, b: 0.0 });

        let drop = DeadDrop::random(&mut rand::thread_rng());
        let msg = [0x11u8; SIZE_ENCRYPTED_MESSAGE];
        let (onion, keys) = sealed_exchange(drop, &msg, 3, &server);

        let replies = service.run_round(3, vec![onion]).await.unwrap();
        let opened = onion_open_reply(&replies[0], &backward_nonce(3), &keys).unwrap();
        assert_eq!(opened, msg.to_vec());
    }

    #[tokio::test]
    async fn triple_collision_passes_through() {
        let (service, server) = tail_service(Laplace { mu: 0.0, b: 0.0 });

        let drop = DeadDrop::random(&mut rand::thread_rng());
        let msgs: Vec<[u8; SIZE_ENCRYPTED_MESSAGE]> =
            (0u8..3).map(|i| [i; SIZE_ENCRYPTED_MESSAGE]).collect();

        let mut onions = Vec::new();
        let mut keys = Vec::new();
        for msg in &msgs {
            let (onion, k) = sealed_exchange(drop, msg, 4, &server);
            onions.push(onion);
            keys.push(k);
        }

        let replies = service.run_round(4, onions).await.unwrap();
        for (i, msg) in msgs.iter().enumerate() {
            let opened = onion_open_reply(&replies[i], &backward_nonce(4), &keys[i]).unwrap();
            assert_eq!(opened, msg.to_vec());
        }
    }

    #[tokio::test]
    async fn malformed_onion_keeps_batch_size() {
        let (service, server) = tail_service(Laplace { mu: 0.0, b: 0.0 });

        let drop = DeadDrop::random(&mut rand::thread_rng());
        let msg = [0x42u8; SIZE_ENCRYPTED_MESSAGE];
        let (good, keys) = sealed_exchange(drop, &msg, 9, &server);
        let junk = vec![0u8; 10];

        let replies = service.run_round(9, vec![junk, good]).await.unwrap();
        assert_eq!(replies.len(), 2);

        // The broken slot yields undecryptable bytes of the right size.
        assert_eq!(replies[0].len(), replies[1].len());
        assert!(onion_open_reply(&replies[0], &backward_nonce(9), &keys).is_err());

        // The good slot still echoes.
        let opened = onion_open_reply(&replies[1], &backward_nonce(9), &keys).unwrap();
        assert_eq!(opened, msg.to_vec());
    }

    #[tokio::test]
    async fn completed_round_rejects_replay() {
        let (service, _server) = tail_service(Laplace { mu: 0.0, b: 0.0 });

        service.run_round(5, Vec::new()).await.unwrap();
        let err = service.run_round(5, Vec::new()).await;
        assert!(matches!(err, Err(MixError::RoundReplayed { round: 5 })));
    }

    #[tokio::test]
    async fn new_round_is_idempotent() {
        let (service, _server) = tail_service(Laplace { mu: 0.0, b: 0.0 });
        service.new_round(8).await.unwrap();
        service.new_round(8).await.unwrap();
        // Announce does not block execution.
        assert!(service.run_round(8, Vec::new()).await.is_ok());
    }

    #[test]
    fn round_table_evicts_oldest() {
        let mut table = RoundTable::default();
        for round in 0..(MAX_TRACKED_ROUNDS as u32 + 10) {
            table.announce(round);
        }
        assert!(table.phase(0).is_none());
        assert!(table.phase(MAX_TRACKED_ROUNDS as u32 + 9).is_some());
    }
}
