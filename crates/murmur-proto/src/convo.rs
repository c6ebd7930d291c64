//! Fixed-size conversation formats carried inside onions.
//!
//! Every client submits exactly one [`ConvoExchange`] per round, so all
//! onions in a batch are the same size and indistinguishable. The exchange
//! is `dead_drop (16) || encrypted_message (256)`; the encrypted message is
//! a peer-boxed [`ConvoMessage`] of exactly [`SIZE_MESSAGE`] bytes.
//!
//! A `ConvoMessage` is a tagged union: tag byte 0 is a timestamp (zigzag
//! varint unix seconds, used as cover chatter and for latency measurement),
//! tag byte 1 is text (raw bytes, NUL-padded to fill the frame).

use murmur_crypto::{DeadDrop, DEAD_DROP_SIZE, TAG_SIZE};

use crate::{errors::ProtocolError, Result};

/// Size of a marshalled [`ConvoMessage`].
pub const SIZE_MESSAGE: usize = 240;

/// Size of a sealed message: plaintext plus the box tag.
pub const SIZE_ENCRYPTED_MESSAGE: usize = SIZE_MESSAGE + TAG_SIZE;

/// Size of a marshalled [`ConvoExchange`].
pub const SIZE_EXCHANGE: usize = DEAD_DROP_SIZE + SIZE_ENCRYPTED_MESSAGE;

/// Maximum text bytes that fit in one message (frame minus tag byte).
pub const MAX_TEXT_SIZE: usize = SIZE_MESSAGE - 1;

const TAG_TIMESTAMP: u8 = 0;
const TAG_TEXT: u8 = 1;

/// The plaintext a peer box carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvoMessage {
    /// Cover chatter: the sender's clock at build time, unix seconds.
    Timestamp(i64),
    /// User text, at most [`MAX_TEXT_SIZE`] bytes.
    Text(Vec<u8>),
}

impl ConvoMessage {
    /// Marshal to the fixed frame. Text longer than [`MAX_TEXT_SIZE`] is
    /// truncated; shorter text is NUL-padded.
    pub fn marshal(&self) -> [u8; SIZE_MESSAGE] {
        let mut out = [0u8; SIZE_MESSAGE];
        match self {
            ConvoMessage::Timestamp(secs) => {
                out[0] = TAG_TIMESTAMP;
                put_varint(&mut out[1..], *secs);
            }
            ConvoMessage::Text(text) => {
                out[0] = TAG_TEXT;
                let n = text.len().min(MAX_TEXT_SIZE);
                out[1..1 + n].copy_from_slice(&text[..n]);
            }
        }
        out
    }

    /// Unmarshal from a received frame.
    ///
    /// Text is returned with its padding intact; display code trims
    /// trailing NULs.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Malformed` on an empty buffer, unknown tag, or a
    /// varint that does not terminate.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        let (&tag, body) = data.split_first().ok_or(ProtocolError::Malformed {
            context: "convo message",
            detail: "empty buffer".into(),
        })?;

        match tag {
            TAG_TIMESTAMP => {
                let secs = get_varint(body).ok_or(ProtocolError::Malformed {
                    context: "convo message",
                    detail: "unterminated timestamp varint".into(),
                })?;
                Ok(ConvoMessage::Timestamp(secs))
            }
            TAG_TEXT => Ok(ConvoMessage::Text(body.to_vec())),
            other => Err(ProtocolError::Malformed {
                context: "convo message",
                detail: format!("unexpected message tag: {other}"),
            }),
        }
    }
}

/// Zigzag-encode a signed value and write it LEB128. The 240-byte frame
/// always has room for the at-most-10-byte encoding.
fn put_varint(out: &mut [u8], value: i64) {
    let mut v = (value as u64).wrapping_shl(1) ^ ((value >> 63) as u64);
    let mut i = 0;
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out[i] = byte;
            return;
        }
        out[i] = byte | 0x80;
        i += 1;
    }
}

/// Read a zigzag LEB128 varint; `None` if it runs off the buffer or
/// overflows 64 bits.
fn get_varint(data: &[u8]) -> Option<i64> {
    let mut v: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        v |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            let decoded = ((v >> 1) as i64) ^ -((v & 1) as i64);
            return Some(decoded);
        }
    }
    None
}

/// One dead-drop slot: the rendezvous identifier and the sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvoExchange {
    /// Where to meet this round.
    pub dead_drop: DeadDrop,
    /// The peer-boxed message, exactly [`SIZE_ENCRYPTED_MESSAGE`] bytes.
    pub encrypted_message: [u8; SIZE_ENCRYPTED_MESSAGE],
}

impl ConvoExchange {
    /// Compose from parts.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Malformed` if the sealed message has the wrong
    /// length.
    pub fn new(dead_drop: DeadDrop, sealed: &[u8]) -> Result<Self> {
        let encrypted_message: [u8; SIZE_ENCRYPTED_MESSAGE] =
            sealed.try_into().map_err(|_| ProtocolError::Malformed {
                context: "convo exchange",
                detail: format!(
                    "encrypted message is {} bytes, expected {}",
                    sealed.len(),
                    SIZE_ENCRYPTED_MESSAGE
                ),
            })?;
        Ok(Self { dead_drop, encrypted_message })
    }

    /// Marshal to the fixed wire layout.
    pub fn marshal(&self) -> [u8; SIZE_EXCHANGE] {
        let mut out = [0u8; SIZE_EXCHANGE];
        out[..DEAD_DROP_SIZE].copy_from_slice(self.dead_drop.as_bytes());
        out[DEAD_DROP_SIZE..].copy_from_slice(&self.encrypted_message);
        out
    }

    /// Unmarshal from a peeled onion payload.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Malformed` if the payload is not exactly
    /// [`SIZE_EXCHANGE`] bytes.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        if data.len() != SIZE_EXCHANGE {
            return Err(ProtocolError::Malformed {
                context: "convo exchange",
                detail: format!("{} bytes, expected {}", data.len(), SIZE_EXCHANGE),
            });
        }

        let dead_drop = DeadDrop::from_slice(&data[..DEAD_DROP_SIZE])
            .unwrap_or_else(|_| unreachable!("length checked above"));
        let mut encrypted_message = [0u8; SIZE_ENCRYPTED_MESSAGE];
        encrypted_message.copy_from_slice(&data[DEAD_DROP_SIZE..]);

        Ok(Self { dead_drop, encrypted_message })
    }
}
