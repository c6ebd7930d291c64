//! Entry coordinator for the murmur network.
//!
//! The coordinator owns the global round number. Its round loop announces
//! each round to every connected client session, collects at most one
//! onion per session until the receive deadline, freezes the batch, ships
//! it to the chain head, and fans the replies back out positionally.
//!
//! Rounds pipeline at the coordinator: a slow chain call never stalls the
//! announcement of the next round. Failures are round-scoped: a chain
//! error turns into `ConvoError` frames for that round's contributors and
//! nothing else.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
pub mod round;
pub mod server;
pub mod session;

pub use error::CoordinatorError;
pub use round::{RoundBatch, RoundLedger, SessionId, SubmitError, Submission};
pub use server::{Coordinator, CoordinatorConfig};
pub use session::Session;
