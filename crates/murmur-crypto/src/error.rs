//! Error type for cryptographic operations.
//!
//! Crypto failures are confined: a failed open drops the affected slot or
//! message, never the surrounding batch. Callers log and continue.

use thiserror::Error;

/// Errors from box, onion and key operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Authenticated decryption failed (wrong key, wrong nonce, or tamper).
    #[error("decryption failed: {context}")]
    DecryptFailed {
        /// Which layer failed (peer box, onion hop, reply layer).
        context: &'static str,
    },

    /// Input too short to contain the expected structure.
    #[error("{context}: need at least {expected} bytes, got {actual}")]
    Truncated {
        /// What was being parsed.
        context: &'static str,
        /// Minimum length required.
        expected: usize,
        /// Length provided.
        actual: usize,
    },

    /// A hex-encoded key failed to parse.
    #[error("invalid key encoding: {0}")]
    InvalidKey(String),
}
