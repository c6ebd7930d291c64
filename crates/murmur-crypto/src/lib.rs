//! Cryptographic primitives for the murmur mix network.
//!
//! This crate is the leaf of the workspace: key types, the authenticated
//! peer box, onion sealing/peeling, dead-drop derivation, round nonce
//! discipline, and the Laplace sampler used for cover traffic. Everything
//! here is pure computation with no I/O and no global state. Randomness is taken
//! from caller-provided RNGs so tests can be deterministic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod boxes;
pub mod deaddrop;
mod error;
pub mod keys;
pub mod laplace;
pub mod nonce;
pub mod onion;

pub use boxes::{box_open, box_seal, shared_key, SharedKey};
pub use deaddrop::{DeadDrop, DEAD_DROP_SIZE};
pub use error::CryptoError;
pub use keys::{KeyPair, PrivateKey, PublicKey, KEY_SIZE};
pub use laplace::Laplace;
pub use nonce::{backward_nonce, forward_nonce, peer_nonce, Nonce, Role};
pub use onion::{onion_open_reply, onion_peel, onion_seal, onion_seal_reply, ONION_OVERHEAD, REPLY_OVERHEAD};

/// Poly1305 authentication tag size, the overhead of every sealed box.
pub const TAG_SIZE: usize = 16;
