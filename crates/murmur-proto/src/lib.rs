//! Wire formats for the murmur mix network.
//!
//! Three distinct surfaces share this crate:
//!
//! - [`envelope`]: the self-describing CBOR envelope exchanged between
//!   clients and the entry coordinator over WebSocket.
//! - [`frame`] / [`header`] / [`rpc`]: the binary-framed, pipelined RPC
//!   spoken between adjacent mixes (and by the coordinator to the chain
//!   head). Fixed 24-byte header for O(1) demultiplexing, CBOR payloads.
//! - [`convo`]: the fixed-size conversation formats that ride inside
//!   onions: `ConvoMessage` and `ConvoExchange`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod convo;
pub mod envelope;
mod errors;
pub mod frame;
pub mod header;
pub mod opcode;
pub mod rpc;

pub use convo::{
    ConvoExchange, ConvoMessage, SIZE_ENCRYPTED_MESSAGE, SIZE_EXCHANGE, SIZE_MESSAGE,
};
pub use envelope::Envelope;
pub use errors::ProtocolError;
pub use frame::Frame;
pub use header::FrameHeader;
pub use opcode::Opcode;
pub use rpc::{RpcErrorPayload, RpcRequest, RpcResponse, RunRoundCall, RoundReplies};

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
