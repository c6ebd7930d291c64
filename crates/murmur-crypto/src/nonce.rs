//! Round nonce discipline.
//!
//! Three nonce families, all 24 bytes (XChaCha20), all derived from the
//! round number:
//!
//! - Forward onion nonce: round (big-endian) in bytes 0-3, byte 4 = 0.
//! - Backward onion nonce: round in bytes 0-3, byte 4 = 1.
//! - Peer box nonce: round in bytes 0-3, role in byte 23.
//!
//! The forward/backward distinction prevents a layer sealed on the way in
//! from being replayed on the way out. The peer-box role byte gives the two
//! directions of a conversation distinct nonces under the shared key, so no
//! nonce repeats for any (sender, direction, round) tuple within the u32
//! round space.

use crate::keys::PublicKey;

/// 24-byte XChaCha20 nonce.
pub type Nonce = [u8; 24];

/// Conversation role, assigned by bytewise comparison of the two public
/// keys. The lexicographically smaller key is `First`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Holder of the smaller public key; nonce byte 0.
    First,
    /// Holder of the larger (or equal, for self-talk) key; nonce byte 1.
    Second,
}

impl Role {
    /// My role in a conversation with `peer`.
    ///
    /// Self-talk (`mine == peer`) yields `Second` on both sides, which is
    /// what makes the solo echo decryptable.
    pub fn mine(mine: &PublicKey, peer: &PublicKey) -> Self {
        if mine < peer { Role::First } else { Role::Second }
    }

    /// The peer's role: computed from their perspective, not negated, so
    /// that self-talk assigns both sides the same role.
    pub fn theirs(mine: &PublicKey, peer: &PublicKey) -> Self {
        Self::mine(peer, mine)
    }

    fn byte(self) -> u8 {
        match self {
            Role::First => 0,
            Role::Second => 1,
        }
    }
}

/// Nonce for peeling onion layers on the way to the dead drop.
pub fn forward_nonce(round: u32) -> Nonce {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&round.to_be_bytes());
    nonce
}

/// Nonce for the reply layers on the way back; disjoint from the forward
/// family via byte 4.
pub fn backward_nonce(round: u32) -> Nonce {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&round.to_be_bytes());
    nonce[4] = 1;
    nonce
}

/// Nonce for the end-to-end peer box.
pub fn peer_nonce(round: u32, role: Role) -> Nonce {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&round.to_be_bytes());
    nonce[23] = role.byte();
    nonce
}
