//! Error types for the mix server.

use thiserror::Error;

/// Errors from the round pipeline and the inter-mix link.
///
/// Transport and remote errors abort only the round they occur in; the
/// caller reports the failure to that round's contributors and the next
/// round proceeds normally.
#[derive(Error, Debug)]
pub enum MixError {
    /// Network failure on the link to the next mix.
    #[error("link transport: {0}")]
    Transport(String),

    /// The next mix returned a typed error.
    #[error("next hop: {0}")]
    Remote(String),

    /// A `RunConvoRound` arrived for a round this mix already completed.
    #[error("round {round} already completed")]
    RoundReplayed {
        /// The replayed round.
        round: u32,
    },

    /// The next hop returned a batch of the wrong size.
    #[error("reply count mismatch: sent {sent}, got {got}")]
    ReplyCountMismatch {
        /// Onions forwarded.
        sent: usize,
        /// Replies received.
        got: usize,
    },

    /// Wire-format failure.
    #[error(transparent)]
    Protocol(#[from] murmur_proto::ProtocolError),

    /// Socket-level failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Bad startup configuration.
    #[error("config: {0}")]
    Config(String),
}

impl MixError {
    /// Render for an RPC error payload sent to the caller. Key material
    /// never appears in these messages.
    pub fn to_wire_message(&self) -> String {
        self.to_string()
    }
}
