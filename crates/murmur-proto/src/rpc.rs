//! Typed payloads for the inter-mix RPC surface.
//!
//! The frame header's opcode determines the payload type, so only the
//! inner struct is CBOR-encoded, with no variant tag on the wire. An attacker
//! cannot send a mismatched opcode/payload pair: decoding interprets the
//! bytes strictly per the opcode.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    errors::ProtocolError,
    frame::Frame,
    header::FrameHeader,
    opcode::Opcode,
    Result,
};

/// `NewConvoRound` call: lets the next hop pre-allocate round state.
/// Idempotent per round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoundCall {
    /// Round being announced.
    pub round: u32,
}

/// `RunConvoRound` call: the forward batch for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRoundCall {
    /// Round the batch belongs to.
    pub round: u32,
    /// One onion per submission slot, in coordinator order.
    pub onions: Vec<Vec<u8>>,
}

/// Successful `RunConvoRound` reply. `replies.len()` equals the request's
/// `onions.len()` and preserves slot order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReplies {
    /// Round the replies belong to.
    pub round: u32,
    /// One reply per slot, in the caller's original order.
    pub replies: Vec<Vec<u8>>,
}

/// Typed error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    /// Human-readable description; never contains key material.
    pub message: String,
}

/// A decoded RPC request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    /// Round announcement.
    NewConvoRound(NewRoundCall),
    /// Round execution.
    RunConvoRound(RunRoundCall),
}

/// A decoded RPC response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcResponse {
    /// `NewConvoRound` accepted.
    RoundAccepted,
    /// `RunConvoRound` replies.
    RoundReplies(RoundReplies),
    /// Call failed.
    Error(RpcErrorPayload),
}

fn encode_cbor<T: Serialize>(value: &T, dst: &mut impl BufMut) -> Result<()> {
    ciborium::ser::into_writer(value, dst.writer())
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
}

fn decode_cbor<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl RpcRequest {
    /// Opcode for this request.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::NewConvoRound(_) => Opcode::NewConvoRound,
            Self::RunConvoRound(_) => Opcode::RunConvoRound,
        }
    }

    /// Build the wire frame for this request.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborEncode` if serialization fails.
    pub fn into_frame(self, request_id: u64) -> Result<Frame> {
        let mut buf = Vec::new();
        match &self {
            Self::NewConvoRound(inner) => encode_cbor(inner, &mut buf)?,
            Self::RunConvoRound(inner) => encode_cbor(inner, &mut buf)?,
        }
        Ok(Frame::new(FrameHeader::new(self.opcode(), request_id), buf))
    }

    /// Decode a request from a received frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` for non-request opcodes.
    /// - `ProtocolError::CborDecode` on payload mismatch.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.header.opcode_enum() {
            Some(Opcode::NewConvoRound) => {
                Ok(Self::NewConvoRound(decode_cbor(&frame.payload)?))
            }
            Some(Opcode::RunConvoRound) => {
                Ok(Self::RunConvoRound(decode_cbor(&frame.payload)?))
            }
            _ => Err(ProtocolError::UnknownOpcode(frame.header.opcode())),
        }
    }
}

impl RpcResponse {
    /// Opcode for this response.
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::RoundAccepted => Opcode::RoundAccepted,
            Self::RoundReplies(_) => Opcode::RoundReplies,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Build the wire frame for this response, echoing the request id.
    ///
    /// # Errors
    ///
    /// `ProtocolError::CborEncode` if serialization fails.
    pub fn into_frame(self, request_id: u64) -> Result<Frame> {
        let mut buf = Vec::new();
        match &self {
            Self::RoundAccepted => {}
            Self::RoundReplies(inner) => encode_cbor(inner, &mut buf)?,
            Self::Error(inner) => encode_cbor(inner, &mut buf)?,
        }
        Ok(Frame::new(FrameHeader::new(self.opcode(), request_id), buf))
    }

    /// Decode a response from a received frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` for non-response opcodes.
    /// - `ProtocolError::CborDecode` on payload mismatch.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        match frame.header.opcode_enum() {
            Some(Opcode::RoundAccepted) => Ok(Self::RoundAccepted),
            Some(Opcode::RoundReplies) => Ok(Self::RoundReplies(decode_cbor(&frame.payload)?)),
            Some(Opcode::Error) => Ok(Self::Error(decode_cbor(&frame.payload)?)),
            _ => Err(ProtocolError::UnknownOpcode(frame.header.opcode())),
        }
    }
}
