//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet for the inter-mix RPC link:
//! a 24-byte binary header followed by a CBOR payload. This is a pure data
//! holder; for the typed view see [`crate::rpc`].

use bytes::{BufMut, Bytes};

use crate::{errors::ProtocolError, header::FrameHeader, Result};

/// Complete RPC frame.
///
/// Layout on the wire: `[FrameHeader: 24 bytes] + [payload: variable]`.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`; enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`];
///   enforced at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Raw payload bytes (already CBOR-encoded).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, setting the header's payload size from the actual
    /// payload length so the two cannot disagree.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Bytes is bounded by isize::MAX and the protocol limit is 16 MB,
        // so the length always fits in u32.
        #[allow(clippy::expect_used)]
        let payload_len =
            u32::try_from(payload.len()).expect("invariant: payload length fits in u32");
        header.payload_size = payload_len.to_be_bytes();

        Self { header, payload }
    }

    /// Encode the frame into a buffer.
    ///
    /// # Errors
    ///
    /// `ProtocolError::PayloadTooLarge` if the payload exceeds the 16 MB
    /// wire limit.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Decode a frame from wire bytes. Trailing bytes beyond the claimed
    /// payload are ignored.
    ///
    /// # Errors
    ///
    /// - Header errors from [`FrameHeader::from_bytes`].
    /// - `ProtocolError::FrameTruncated` if the buffer holds fewer payload
    ///   bytes than the header claims.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total = FrameHeader::SIZE + payload_size;

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(FrameHeader::SIZE),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..total]);
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::new(FrameHeader::new(Opcode::RunConvoRound, 7), vec![1u8, 2, 3]);
        assert_eq!(frame.header.payload_size(), 3);

        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();
        assert_eq!(wire.len(), FrameHeader::SIZE + 3);

        let parsed = Frame::decode(&wire).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn rejects_truncated_payload() {
        let frame = Frame::new(FrameHeader::new(Opcode::RoundReplies, 1), vec![0u8; 64]);
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();
        wire.truncate(FrameHeader::SIZE + 10);

        assert!(matches!(Frame::decode(&wire), Err(ProtocolError::FrameTruncated { .. })));
    }

    #[test]
    fn ignores_trailing_bytes() {
        let frame = Frame::new(FrameHeader::new(Opcode::RoundAccepted, 1), vec![9u8; 4]);
        let mut wire = Vec::new();
        frame.encode(&mut wire).unwrap();
        wire.extend_from_slice(&[0xAA; 16]);

        assert_eq!(Frame::decode(&wire).unwrap(), frame);
    }
}
