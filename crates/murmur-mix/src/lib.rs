//! Mix server for the murmur network.
//!
//! Each mix peels one onion layer per round, injects Laplace-distributed
//! cover onions, shuffles, and forwards the batch to its successor; the
//! tail mix performs the dead-drop exchange. Replies retrace the chain in
//! reverse: covers stripped, permutation inverted, one symmetric reply
//! layer sealed per hop.
//!
//! # Components
//!
//! - [`ConvoService`]: the per-round pipeline executor.
//! - [`NextHop`] / [`RpcLink`]: the link to the successor mix, a pool of
//!   pipelined TCP connections with request-id demultiplexing.
//! - [`serve`]: the RPC accept loop the predecessor (or the coordinator)
//!   talks to.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod link;
pub mod rpc;
pub mod service;

pub use config::MixConf;
pub use error::MixError;
pub use link::{NextHop, RpcLink};
pub use rpc::serve;
pub use service::{ConvoService, ServiceConfig};
