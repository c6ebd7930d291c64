//! Protocol error type.

use thiserror::Error;

/// Errors from frame parsing and payload (de)serialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short for a frame header.
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Header magic did not match.
    #[error("invalid frame magic")]
    InvalidMagic,

    /// Protocol version not understood.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the wire limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Claimed or actual size.
        size: usize,
        /// Maximum permitted.
        max: usize,
    },

    /// Payload truncated relative to the header's claim.
    #[error("frame truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the header claims.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },

    /// Opcode not recognized for this surface.
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    /// CBOR encoding failed.
    #[error("cbor encode: {0}")]
    CborEncode(String),

    /// CBOR decoding failed.
    #[error("cbor decode: {0}")]
    CborDecode(String),

    /// A fixed-size conversation structure had the wrong length or tag.
    #[error("malformed {context}: {detail}")]
    Malformed {
        /// Structure being parsed.
        context: &'static str,
        /// What was wrong.
        detail: String,
    },
}
