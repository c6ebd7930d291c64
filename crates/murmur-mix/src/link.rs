//! Link to the next mix in the chain.
//!
//! [`NextHop`] abstracts the successor so the pipeline can run against a
//! real TCP link in production and an in-process service in tests.
//! [`RpcLink`] is the production implementation: a pool of TCP
//! connections, each carrying pipelined request/response frames matched by
//! request id, so several rounds can be in flight on one link without
//! head-of-line blocking between them.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::future::BoxFuture;
use murmur_proto::{Frame, RpcRequest, RpcResponse, RoundReplies};
use murmur_proto::rpc::{NewRoundCall, RunRoundCall};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::oneshot,
};

use crate::{error::MixError, rpc::{read_frame, write_frame}};

/// Delay between redial attempts.
const DIAL_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Redial attempts for a connection that died mid-run. Startup dialing
/// retries indefinitely instead; see [`RpcLink::dial_retry`].
const REDIAL_ATTEMPTS: usize = 3;

/// The successor mix, as seen by the round pipeline.
///
/// Implementations must confine failures to the affected call: a failed
/// `run_round` aborts that round only.
pub trait NextHop: Send + Sync {
    /// Announce a round downstream.
    fn new_round(&self, round: u32) -> BoxFuture<'_, Result<(), MixError>>;

    /// Forward a batch and await the reply batch, which has the same
    /// length and slot order.
    fn run_round(
        &self,
        round: u32,
        onions: Vec<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Vec<Vec<u8>>, MixError>>;
}

/// One pooled connection: a locked writer, and a reader task that routes
/// response frames to waiting callers by request id.
struct Conn {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    closed: Arc<AtomicBool>,
}

impl Conn {
    fn start(stream: TcpStream) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });

        tokio::spawn(reader_loop(
            read_half,
            Arc::clone(&conn.pending),
            Arc::clone(&conn.closed),
        ));

        conn
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a frame and await the matching response.
    async fn call(&self, frame: Frame) -> Result<Frame, MixError> {
        let request_id = frame.header.request_id();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(request_id, tx);

        let write_result = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };

        if let Err(err) = write_result {
            self.pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&request_id);
            self.closed.store(true, Ordering::Release);
            return Err(MixError::Transport(format!("write failed: {err}")));
        }

        rx.await
            .map_err(|_| MixError::Transport("connection closed awaiting response".to_string()))
    }
}

/// Route incoming frames to their waiting callers. On read failure every
/// pending call observes a dropped sender and fails with a transport
/// error.
async fn reader_loop(
    mut read_half: OwnedReadHalf,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Frame>>>>,
    closed: Arc<AtomicBool>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(frame) => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&frame.header.request_id());
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => {
                        tracing::warn!(
                            request_id = frame.header.request_id(),
                            "response for unknown request id"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::debug!(%err, "link reader stopped");
                closed.store(true, Ordering::Release);
                pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clear();
                return;
            }
        }
    }
}

/// Pooled, pipelined RPC client for one chain link.
pub struct RpcLink {
    addr: String,
    slots: Vec<tokio::sync::Mutex<Option<Arc<Conn>>>>,
    next_slot: AtomicUsize,
    next_request_id: AtomicU64,
}

impl RpcLink {
    /// Dial with indefinite retry, for startup. The chain may come up in
    /// any order; a mix waits for its successor.
    pub async fn dial_retry(addr: &str, pool_size: usize) -> Self {
        loop {
            match Self::dial(addr, pool_size).await {
                Ok(link) => return link,
                Err(err) => {
                    tracing::warn!(%addr, %err, "dial failed, will retry");
                    tokio::time::sleep(DIAL_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Dial once, establishing the whole pool.
    ///
    /// # Errors
    ///
    /// `MixError::Io` if any connection fails.
    pub async fn dial(addr: &str, pool_size: usize) -> Result<Self, MixError> {
        let pool_size = pool_size.max(1);
        let mut slots = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let stream = TcpStream::connect(addr).await?;
            slots.push(tokio::sync::Mutex::new(Some(Conn::start(stream))));
        }

        tracing::info!(%addr, pool = pool_size, "link established");

        Ok(Self {
            addr: addr.to_string(),
            slots,
            next_slot: AtomicUsize::new(0),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Get a live connection from the next pool slot, redialing a dead one
    /// with bounded retry.
    async fn conn(&self) -> Result<Arc<Conn>, MixError> {
        let slot_idx = self.next_slot.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let mut slot = self.slots[slot_idx].lock().await;

        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
        }

        let mut last_err = None;
        for attempt in 0..REDIAL_ATTEMPTS {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    let conn = Conn::start(stream);
                    *slot = Some(Arc::clone(&conn));
                    tracing::info!(addr = %self.addr, slot = slot_idx, "link re-established");
                    return Ok(conn);
                }
                Err(err) => {
                    tracing::warn!(addr = %self.addr, attempt, %err, "redial failed");
                    last_err = Some(err);
                    tokio::time::sleep(DIAL_RETRY_DELAY).await;
                }
            }
        }

        *slot = None;
        Err(MixError::Transport(format!(
            "redial to {} failed: {}",
            self.addr,
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string())
        )))
    }

    async fn call(&self, request: RpcRequest) -> Result<RpcResponse, MixError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = request.into_frame(request_id)?;

        let conn = self.conn().await?;
        let response = conn.call(frame).await?;

        match RpcResponse::from_frame(&response)? {
            RpcResponse::Error(err) => Err(MixError::Remote(err.message)),
            other => Ok(other),
        }
    }
}

impl NextHop for RpcLink {
    fn new_round(&self, round: u32) -> BoxFuture<'_, Result<(), MixError>> {
        Box::pin(async move {
            match self.call(RpcRequest::NewConvoRound(NewRoundCall { round })).await? {
                RpcResponse::RoundAccepted => Ok(()),
                other => Err(MixError::Transport(format!(
                    "unexpected response to NewConvoRound: {other:?}"
                ))),
            }
        })
    }

    fn run_round(
        &self,
        round: u32,
        onions: Vec<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Vec<Vec<u8>>, MixError>> {
        Box::pin(async move {
            let sent = onions.len();
            match self.call(RpcRequest::RunConvoRound(RunRoundCall { round, onions })).await? {
                RpcResponse::RoundReplies(RoundReplies { round: reply_round, replies }) => {
                    if reply_round != round {
                        return Err(MixError::Remote(format!(
                            "replies for round {reply_round}, expected {round}"
                        )));
                    }
                    if replies.len() != sent {
                        return Err(MixError::ReplyCountMismatch { sent, got: replies.len() });
                    }
                    Ok(replies)
                }
                other => Err(MixError::Transport(format!(
                    "unexpected response to RunConvoRound: {other:?}"
                ))),
            }
        })
    }
}
