//! RPC frame header with zero-copy parsing.
//!
//! A fixed 24-byte structure serialized as raw binary (big-endian). The
//! request id lets callers pipeline multiple in-flight calls over one TCP
//! connection and match responses without deserializing payloads.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{errors::ProtocolError, opcode::Opcode, Result};

/// Fixed 24-byte frame header (big-endian network byte order).
///
/// Fields are raw byte arrays to avoid alignment issues; the zerocopy
/// traits make casting from untrusted network bytes safe because every
/// 24-byte pattern is a valid instance; validation happens in
/// [`FrameHeader::from_bytes`].
///
/// # Invariants
///
/// - `payload_size` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`];
///   enforced on parse and on [`crate::Frame::encode`].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],
    version: u8,
    flags: u8,
    pub(crate) opcode: [u8; 2],
    request_id: [u8; 8],
    pub(crate) payload_size: [u8; 4],
    reserved: [u8; 4],
}

impl FrameHeader {
    /// Size of the serialized header.
    pub const SIZE: usize = 24;

    /// Magic number: "MRMX" in ASCII.
    pub const MAGIC: u32 = 0x4D52_4D58;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB). A full round batch of tens of
    /// thousands of onions stays well under this.
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a header for the given opcode and request id.
    #[must_use]
    pub fn new(opcode: Opcode, request_id: u64) -> Self {
        Self {
            magic: Self::MAGIC.to_be_bytes(),
            version: Self::VERSION,
            flags: 0,
            opcode: opcode.to_u16().to_be_bytes(),
            request_id: request_id.to_be_bytes(),
            payload_size: [0; 4],
            reserved: [0; 4],
        }
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 24 bytes.
    /// - `ProtocolError::InvalidMagic` / `UnsupportedVersion` on a bad
    ///   preamble.
    /// - `ProtocolError::PayloadTooLarge` if the claimed size exceeds the
    ///   limit.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Raw opcode field.
    pub fn opcode(&self) -> u16 {
        u16::from_be_bytes(self.opcode)
    }

    /// Decoded opcode; `None` if unknown.
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u16(self.opcode())
    }

    /// Request id for response matching.
    pub fn request_id(&self) -> u64 {
        u64::from_be_bytes(self.request_id)
    }

    /// Claimed payload length.
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("opcode", &self.opcode())
            .field("request_id", &self.request_id())
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
