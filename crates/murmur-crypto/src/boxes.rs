//! Authenticated peer box.
//!
//! x25519 key agreement reduced through HKDF-SHA256 to a symmetric key,
//! then XChaCha20-Poly1305 for sealing. Both sides of a conversation derive
//! the identical [`SharedKey`], which also feeds dead-drop derivation.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{
    error::CryptoError,
    keys::{PrivateKey, PublicKey},
    nonce::Nonce,
};

/// Domain separation label for peer-box key derivation.
const BOX_KEY_INFO: &[u8] = b"murmur box key v1";

/// A 32-byte symmetric key shared by two parties.
///
/// Symmetric by construction: `shared_key(a_priv, b_pub)` equals
/// `shared_key(b_priv, a_pub)`.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    /// Raw key bytes, used as the HMAC key for dead drops.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn from_raw(raw: [u8; 32]) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKey(..)")
    }
}

/// Derive the shared symmetric key for a pair of peers.
pub fn shared_key(my_private: &PrivateKey, their_public: &PublicKey) -> SharedKey {
    let dh = my_private.inner().diffie_hellman(their_public.inner());
    SharedKey(kdf(dh.as_bytes(), BOX_KEY_INFO))
}

/// Reduce raw DH output to a uniform symmetric key.
pub(crate) fn kdf(ikm: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; 32];
    let Ok(()) = hk.expand(info, &mut okm) else {
        unreachable!("32 bytes is always a valid HKDF-SHA256 output length");
    };
    okm
}

/// Seal a message under a shared key. Output is `msg.len() + 16` bytes.
pub fn box_seal(key: &SharedKey, nonce: &Nonce, msg: &[u8]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), msg) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

/// Open a sealed message.
///
/// # Errors
///
/// `CryptoError::DecryptFailed` on authentication failure.
pub fn box_open(key: &SharedKey, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptFailed { context: "peer box" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        keys::KeyPair,
        nonce::{peer_nonce, Role},
    };

    #[test]
    fn shared_key_is_symmetric() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);

        let k_ab = shared_key(&a.private, &b.public);
        let k_ba = shared_key(&b.private, &a.public);
        assert_eq!(k_ab.as_bytes(), k_ba.as_bytes());
    }

    #[test]
    fn seal_open_round_trip() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let key = shared_key(&a.private, &b.public);

        let nonce = peer_nonce(3, Role::First);
        let sealed = box_seal(&key, &nonce, b"attack at dawn");
        assert_eq!(sealed.len(), 14 + crate::TAG_SIZE);

        let key_b = shared_key(&b.private, &a.public);
        assert_eq!(box_open(&key_b, &nonce, &sealed).unwrap(), b"attack at dawn");
    }

    #[test]
    fn wrong_role_nonce_fails_open() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let key = shared_key(&a.private, &b.public);

        let sealed = box_seal(&key, &peer_nonce(3, Role::First), b"x");
        let err = box_open(&key, &peer_nonce(3, Role::Second), &sealed);
        assert!(matches!(err, Err(CryptoError::DecryptFailed { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails_open() {
        let mut rng = rand::thread_rng();
        let a = KeyPair::generate(&mut rng);
        let b = KeyPair::generate(&mut rng);
        let key = shared_key(&a.private, &b.public);

        let nonce = peer_nonce(0, Role::First);
        let mut sealed = box_seal(&key, &nonce, b"payload");
        sealed[0] ^= 0x80;
        assert!(box_open(&key, &nonce, &sealed).is_err());
    }
}
