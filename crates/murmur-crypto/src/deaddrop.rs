//! Dead-drop addressing.
//!
//! A dead drop is the per-round rendezvous identifier two peers derive
//! independently: `HMAC-SHA256(shared_key, round_be_u32)` truncated to 16
//! bytes. Both sides compute the same value for every round, so their
//! onions collide at the tail mix and get their payloads swapped.
//!
//! Self-talk uses a uniformly random drop per round: the client's own onion
//! then (almost surely) meets nobody, the tail echoes it back, and the echo
//! is delivered rather than suppressed.

use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::Sha256;

use crate::{boxes::SharedKey, error::CryptoError};

/// Size of a dead-drop identifier in bytes.
pub const DEAD_DROP_SIZE: usize = 16;

/// A 16-byte rendezvous identifier, unique per (pair, round).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeadDrop([u8; DEAD_DROP_SIZE]);

impl DeadDrop {
    /// Derive the drop for a round from a pair's shared key.
    pub fn derive(shared: &SharedKey, round: u32) -> Self {
        let mut mac = Hmac::<Sha256>::new_from_slice(shared.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
        mac.update(&round.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let mut id = [0u8; DEAD_DROP_SIZE];
        id.copy_from_slice(&digest[..DEAD_DROP_SIZE]);
        Self(id)
    }

    /// A uniformly random drop, used for self-talk.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut id = [0u8; DEAD_DROP_SIZE];
        rng.fill_bytes(&mut id);
        Self(id)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; DEAD_DROP_SIZE] {
        &self.0
    }

    /// Parse from a wire slice.
    ///
    /// # Errors
    ///
    /// `CryptoError::Truncated` if fewer than 16 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < DEAD_DROP_SIZE {
            return Err(CryptoError::Truncated {
                context: "dead drop",
                expected: DEAD_DROP_SIZE,
                actual: bytes.len(),
            });
        }
        let mut id = [0u8; DEAD_DROP_SIZE];
        id.copy_from_slice(&bytes[..DEAD_DROP_SIZE]);
        Ok(Self(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boxes::shared_key, keys::KeyPair};

    #[test]
    fn peers_derive_the_same_drop() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);

        for round in [0u32, 1, 42, u32::MAX] {
            let drop_a = DeadDrop::derive(&shared_key(&a.private, &b.public), round);
            let drop_b = DeadDrop::derive(&shared_key(&b.private, &a.public), round);
            assert_eq!(drop_a, drop_b);
        }
    }

    #[test]
    fn drops_differ_across_rounds() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let key = shared_key(&a.private, &b.public);

        assert_ne!(DeadDrop::derive(&key, 1), DeadDrop::derive(&key, 2));
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(DeadDrop::from_slice(&[0u8; 15]).is_err());
        assert!(DeadDrop::from_slice(&[0u8; 16]).is_ok());
        // Longer input is fine; trailing bytes belong to the caller.
        assert!(DeadDrop::from_slice(&[0u8; 64]).is_ok());
    }
}
