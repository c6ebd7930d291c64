//! Client round engine and conversation state for the murmur network.
//!
//! The [`Client`] owns the session to the entry coordinator and drives the
//! round protocol: on every `AnnounceConvoRound` it asks its
//! [`ConvoHandler`] to build the round's onion, and it routes each
//! `ConvoResponse` back to the handler that built the matching request.
//!
//! [`Conversation`] is the handler: it queues outbound text, seals the
//! peer box and the onion, tracks pending rounds, detects echoes of its
//! own ciphertext, and reports peer liveness and latency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod conversation;
mod error;

pub use client::{Client, ConvoHandler};
pub use conversation::{Conversation, PeerMessage, Status};
pub use error::ClientError;
