//! Integration: real WebSocket sessions against a stub chain head.

use std::time::Duration;

use futures::{future::BoxFuture, SinkExt, Stream, StreamExt};
use murmur_coordinator::{Coordinator, CoordinatorConfig};
use murmur_crypto::KeyPair;
use murmur_mix::{MixError, NextHop};
use murmur_proto::Envelope;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Chain head stub that echoes every onion back as its own reply.
struct EchoChain;

impl NextHop for EchoChain {
    fn new_round(&self, _round: u32) -> BoxFuture<'_, Result<(), MixError>> {
        Box::pin(async { Ok(()) })
    }

    fn run_round(
        &self,
        _round: u32,
        onions: Vec<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Vec<Vec<u8>>, MixError>> {
        Box::pin(async move { Ok(onions) })
    }
}

/// Chain head stub that fails every round.
struct BrokenChain;

impl NextHop for BrokenChain {
    fn new_round(&self, _round: u32) -> BoxFuture<'_, Result<(), MixError>> {
        Box::pin(async { Ok(()) })
    }

    fn run_round(
        &self,
        _round: u32,
        _onions: Vec<Vec<u8>>,
    ) -> BoxFuture<'_, Result<Vec<Vec<u8>>, MixError>> {
        Box::pin(async { Err(MixError::Transport("stub failure".to_string())) })
    }
}

async fn start_coordinator(head: Box<dyn NextHop>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let coordinator = Coordinator::new(
        head,
        CoordinatorConfig { receive_wait: Duration::from_millis(100) },
    );
    tokio::spawn(coordinator.run(listener));
    addr
}

async fn connect(
    addr: std::net::SocketAddr,
) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    let key = KeyPair::generate(&mut rand::thread_rng()).public;
    let url = format!("ws://{addr}/ws?publickey={}", key.to_hex());
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn next_envelope<S>(ws: &mut S) -> Envelope
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("read failed");
        if let Message::Binary(data) = message {
            return Envelope::decode(&data).expect("bad envelope");
        }
    }
}

#[tokio::test]
async fn submission_gets_reply_in_same_round() {
    let addr = start_coordinator(Box::new(EchoChain)).await;
    let mut ws = connect(addr).await;

    // Wait for an announce, submit, and expect the echo for that round.
    let round = loop {
        if let Envelope::AnnounceConvoRound { round } = next_envelope(&mut ws).await {
            break round;
        }
    };

    let onion = vec![0x42u8; 64];
    let request = Envelope::ConvoRequest { round, onion: onion.clone() };
    ws.send(Message::Binary(request.encode().unwrap())).await.unwrap();

    loop {
        match next_envelope(&mut ws).await {
            Envelope::ConvoResponse { round: reply_round, onion: reply } => {
                assert_eq!(reply_round, round);
                assert_eq!(reply, onion);
                return;
            }
            Envelope::AnnounceConvoRound { .. } => continue,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}

#[tokio::test]
async fn wrong_round_submission_is_rejected() {
    let addr = start_coordinator(Box::new(EchoChain)).await;
    let mut ws = connect(addr).await;

    let round = loop {
        if let Envelope::AnnounceConvoRound { round } = next_envelope(&mut ws).await {
            break round;
        }
    };

    // A submission for a long-past round never occupies a slot.
    let stale = Envelope::ConvoRequest { round: round + 1000, onion: vec![1] };
    ws.send(Message::Binary(stale.encode().unwrap())).await.unwrap();

    loop {
        match next_envelope(&mut ws).await {
            Envelope::ConvoError { round: error_round, err } => {
                assert_eq!(error_round, round + 1000);
                assert!(err.starts_with("wrong round (currently "), "got: {err}");
                return;
            }
            Envelope::AnnounceConvoRound { .. } => continue,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}

#[tokio::test]
async fn chain_failure_reports_server_error_to_contributors() {
    let addr = start_coordinator(Box::new(BrokenChain)).await;
    let mut ws = connect(addr).await;

    let round = loop {
        if let Envelope::AnnounceConvoRound { round } = next_envelope(&mut ws).await {
            break round;
        }
    };

    let request = Envelope::ConvoRequest { round, onion: vec![9u8; 16] };
    ws.send(Message::Binary(request.encode().unwrap())).await.unwrap();

    loop {
        match next_envelope(&mut ws).await {
            Envelope::ConvoError { round: error_round, err } => {
                assert_eq!(error_round, round);
                assert_eq!(err, "server error");
                return;
            }
            Envelope::AnnounceConvoRound { .. } => continue,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}

#[tokio::test]
async fn malformed_frame_gets_bad_request() {
    let addr = start_coordinator(Box::new(EchoChain)).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Binary(vec![0xde, 0xad])).await.unwrap();

    loop {
        match next_envelope(&mut ws).await {
            Envelope::BadRequestError { err } => {
                assert!(err.starts_with("error parsing request"), "got: {err}");
                return;
            }
            Envelope::AnnounceConvoRound { .. } => continue,
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}

#[tokio::test]
async fn handshake_requires_public_key() {
    let addr = start_coordinator(Box::new(EchoChain)).await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err(), "handshake without publickey must be refused");

    let result =
        tokio_tungstenite::connect_async(format!("ws://{addr}/ws?publickey=nothex")).await;
    assert!(result.is_err(), "handshake with malformed key must be refused");
}
