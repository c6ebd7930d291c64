//! Onion sealing and peeling.
//!
//! The forward onion wraps one authenticated layer per mix, outermost
//! first. Each layer is `ephemeral_public (32 bytes) || ciphertext`, where
//! the ciphertext is the next layer sealed under a key derived from
//! x25519(ephemeral, server), so every hop strips exactly
//! [`ONION_OVERHEAD`] bytes and learns nothing but its own layer.
//!
//! Peeling returns the per-hop [`SharedKey`] alongside the inner payload:
//! the mix keeps it for the round and uses it to seal the reply on the way
//! back ([`onion_seal_reply`], a symmetric layer of [`REPLY_OVERHEAD`]
//! bytes). The client, which kept all hop keys from sealing, removes the
//! reply layers in chain order with [`onion_open_reply`].

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::{CryptoRng, RngCore};
use x25519_dalek::EphemeralSecret;

use crate::{
    boxes::{kdf, SharedKey},
    error::CryptoError,
    keys::{PrivateKey, PublicKey, KEY_SIZE},
    nonce::Nonce,
    TAG_SIZE,
};

/// Bytes each mix strips from a forward onion: ephemeral key plus tag.
pub const ONION_OVERHEAD: usize = KEY_SIZE + TAG_SIZE;

/// Bytes each mix adds to a reply on the way back.
pub const REPLY_OVERHEAD: usize = TAG_SIZE;

/// Domain separation label for per-hop onion keys.
const ONION_KEY_INFO: &[u8] = b"murmur onion key v1";

fn hop_cipher(key: &SharedKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(key.as_bytes().into())
}

/// Seal `payload` for the given chain of server keys.
///
/// Returns the onion and the per-hop shared keys in chain order (`keys[0]`
/// belongs to the first server). The caller must retain the keys to unpeel
/// the reply with [`onion_open_reply`].
pub fn onion_seal<R: RngCore + CryptoRng>(
    payload: &[u8],
    nonce: &Nonce,
    server_keys: &[PublicKey],
    rng: &mut R,
) -> (Vec<u8>, Vec<SharedKey>) {
    let mut shared_keys: Vec<Option<SharedKey>> = vec![None; server_keys.len()];
    let mut onion = payload.to_vec();

    // Innermost layer first: the last server peels last.
    for (i, server) in server_keys.iter().enumerate().rev() {
        let ephemeral = EphemeralSecret::random_from_rng(&mut *rng);
        let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
        let hop_key = SharedKey::from_raw(kdf(
            ephemeral.diffie_hellman(server.inner()).as_bytes(),
            ONION_KEY_INFO,
        ));

        let Ok(sealed) = hop_cipher(&hop_key).encrypt(XNonce::from_slice(nonce), onion.as_slice())
        else {
            unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
        };

        let mut layer = Vec::with_capacity(KEY_SIZE + sealed.len());
        layer.extend_from_slice(ephemeral_public.as_bytes());
        layer.extend_from_slice(&sealed);
        onion = layer;

        shared_keys[i] = Some(hop_key);
    }

    let shared_keys = shared_keys
        .into_iter()
        .map(|k| k.unwrap_or_else(|| unreachable!("every hop key was filled by the loop")))
        .collect();

    (onion, shared_keys)
}

/// Peel one layer at a mix.
///
/// Returns the inner payload and the hop's shared key, needed later to seal
/// the reply for this slot.
///
/// # Errors
///
/// - `CryptoError::Truncated` if the onion is shorter than one layer.
/// - `CryptoError::DecryptFailed` if authentication fails (wrong server,
///   wrong nonce, tampered or cover onion).
pub fn onion_peel(
    onion: &[u8],
    nonce: &Nonce,
    private: &PrivateKey,
) -> Result<(Vec<u8>, SharedKey), CryptoError> {
    if onion.len() < ONION_OVERHEAD {
        return Err(CryptoError::Truncated {
            context: "onion layer",
            expected: ONION_OVERHEAD,
            actual: onion.len(),
        });
    }

    let mut ephemeral_bytes = [0u8; KEY_SIZE];
    ephemeral_bytes.copy_from_slice(&onion[..KEY_SIZE]);
    let ephemeral_public = x25519_dalek::PublicKey::from(ephemeral_bytes);

    let hop_key = SharedKey::from_raw(kdf(
        private.inner().diffie_hellman(&ephemeral_public).as_bytes(),
        ONION_KEY_INFO,
    ));

    let inner = hop_cipher(&hop_key)
        .decrypt(XNonce::from_slice(nonce), &onion[KEY_SIZE..])
        .map_err(|_| CryptoError::DecryptFailed { context: "onion layer" })?;

    Ok((inner, hop_key))
}

/// Seal one reply layer at a mix, using the shared key recorded at peel
/// time. Adds [`REPLY_OVERHEAD`] bytes.
pub fn onion_seal_reply(key: &SharedKey, nonce: &Nonce, reply: &[u8]) -> Vec<u8> {
    let Ok(sealed) = hop_cipher(key).encrypt(XNonce::from_slice(nonce), reply) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    sealed
}

/// Remove all reply layers at the client.
///
/// `keys` are the per-hop shared keys in chain order, as returned by
/// [`onion_seal`]; the first server's layer is outermost.
///
/// # Errors
///
/// `CryptoError::DecryptFailed` if any layer fails to authenticate.
pub fn onion_open_reply(
    reply: &[u8],
    nonce: &Nonce,
    keys: &[SharedKey],
) -> Result<Vec<u8>, CryptoError> {
    let mut inner = reply.to_vec();
    for key in keys {
        inner = hop_cipher(key)
            .decrypt(XNonce::from_slice(nonce), inner.as_slice())
            .map_err(|_| CryptoError::DecryptFailed { context: "reply layer" })?;
    }
    Ok(inner)
}
