//! Client ↔ coordinator envelope.
//!
//! A self-describing tagged union sent as binary WebSocket messages. CBOR
//! keeps the variant name on the wire (externally tagged), so either side
//! can parse without out-of-band context and unknown variants fail loudly.

use serde::{Deserialize, Serialize};

use crate::{errors::ProtocolError, Result};

/// Application-layer message between a client and the entry coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// Client submission for a round.
    ConvoRequest {
        /// Round the onion was built for.
        round: u32,
        /// The sealed onion.
        onion: Vec<u8>,
    },

    /// Coordinator reply carrying the slot's unpeeled response.
    ConvoResponse {
        /// Round the reply belongs to.
        round: u32,
        /// Reply onion, one symmetric layer per mix.
        onion: Vec<u8>,
    },

    /// Coordinator announcement opening a round for submissions.
    AnnounceConvoRound {
        /// The newly opened round.
        round: u32,
    },

    /// Round-scoped failure (wrong round, chain error). The session stays
    /// open; the client simply misses this round.
    ConvoError {
        /// Affected round.
        round: u32,
        /// Description.
        err: String,
    },

    /// The coordinator could not parse a request at all.
    BadRequestError {
        /// Description.
        err: String,
    },
}

impl Envelope {
    /// Encode for the wire.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborEncode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| ProtocolError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborDecode` on malformed input or an unknown
    /// variant.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_round_trip() {
        let envelopes = [
            Envelope::ConvoRequest { round: 1, onion: vec![1, 2, 3] },
            Envelope::ConvoResponse { round: 2, onion: vec![] },
            Envelope::AnnounceConvoRound { round: 3 },
            Envelope::ConvoError { round: 4, err: "wrong round (currently 5)".into() },
            Envelope::BadRequestError { err: "error parsing request".into() },
        ];

        for env in envelopes {
            let wire = env.encode().unwrap();
            assert_eq!(Envelope::decode(&wire).unwrap(), env);
        }
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(Envelope::decode(&[0xde, 0xad, 0xbe, 0xef]).is_err());
        assert!(Envelope::decode(&[]).is_err());
    }
}
