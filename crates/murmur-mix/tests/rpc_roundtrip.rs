//! Integration: a two-mix chain over real TCP, driven through `RpcLink`.

use std::sync::Arc;

use murmur_crypto::{
    backward_nonce, forward_nonce, onion_open_reply, onion_seal, shared_key, DeadDrop, KeyPair,
    Laplace, SharedKey,
};
use murmur_mix::{serve, ConvoService, NextHop, RpcLink, ServiceConfig};
use murmur_proto::{ConvoExchange, SIZE_ENCRYPTED_MESSAGE};
use tokio::net::TcpListener;

async fn spawn_mix(service: ConvoService) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(service)));
    addr
}

fn quiet() -> Laplace {
    Laplace { mu: 0.0, b: 0.0 }
}

/// Start a head → tail chain; returns (link to head, server keys in chain
/// order).
async fn start_chain() -> (RpcLink, Vec<KeyPair>) {
    let mut rng = rand::thread_rng();
    let head_keys = KeyPair::generate(&mut rng);
    let tail_keys = KeyPair::generate(&mut rng);

    let tail = ConvoService::new(
        ServiceConfig { server_name: "tail".into(), laplace: quiet(), hops_after: 0 },
        tail_keys.private.clone(),
        None,
    );
    let tail_addr = spawn_mix(tail).await;

    let tail_link = RpcLink::dial(&tail_addr.to_string(), 1).await.unwrap();
    let head = ConvoService::new(
        ServiceConfig { server_name: "head".into(), laplace: quiet(), hops_after: 1 },
        head_keys.private.clone(),
        Some(Box::new(tail_link)),
    );
    let head_addr = spawn_mix(head).await;

    let head_link = RpcLink::dial(&head_addr.to_string(), 2).await.unwrap();
    (head_link, vec![head_keys, tail_keys])
}

fn seal_for_chain(
    drop: DeadDrop,
    message: [u8; SIZE_ENCRYPTED_MESSAGE],
    round: u32,
    servers: &[KeyPair],
) -> (Vec<u8>, Vec<SharedKey>) {
    let publics: Vec<_> = servers.iter().map(|s| s.public).collect();
    let exchange = ConvoExchange { dead_drop: drop, encrypted_message: message };
    onion_seal(&exchange.marshal(), &forward_nonce(round), &publics, &mut rand::thread_rng())
}

#[tokio::test]
async fn exchange_through_tcp_chain() {
    let (link, servers) = start_chain().await;

    let mut rng = rand::thread_rng();
    let alice = KeyPair::generate(&mut rng);
    let bob = KeyPair::generate(&mut rng);
    let drop = DeadDrop::derive(&shared_key(&alice.private, &bob.public), 1);

    let msg_a = [0xA1u8; SIZE_ENCRYPTED_MESSAGE];
    let msg_b = [0xB2u8; SIZE_ENCRYPTED_MESSAGE];
    let (onion_a, keys_a) = seal_for_chain(drop, msg_a, 1, &servers);
    let (onion_b, keys_b) = seal_for_chain(drop, msg_b, 1, &servers);

    link.new_round(1).await.unwrap();
    let replies = link.run_round(1, vec![onion_a, onion_b]).await.unwrap();
    assert_eq!(replies.len(), 2);

    let opened_a = onion_open_reply(&replies[0], &backward_nonce(1), &keys_a).unwrap();
    let opened_b = onion_open_reply(&replies[1], &backward_nonce(1), &keys_b).unwrap();
    assert_eq!(opened_a, msg_b.to_vec());
    assert_eq!(opened_b, msg_a.to_vec());
}

#[tokio::test]
async fn rounds_pipeline_on_one_link() {
    let (link, servers) = start_chain().await;

    // Several sequential rounds over the same pooled link; each round's
    // singleton echoes back.
    for round in 10..20u32 {
        let drop = DeadDrop::random(&mut rand::thread_rng());
        let msg = [round as u8; SIZE_ENCRYPTED_MESSAGE];
        let (onion, keys) = seal_for_chain(drop, msg, round, &servers);

        let replies = link.run_round(round, vec![onion]).await.unwrap();
        let opened = onion_open_reply(&replies[0], &backward_nonce(round), &keys).unwrap();
        assert_eq!(opened, msg.to_vec());
    }
}

#[tokio::test]
async fn replayed_round_returns_remote_error() {
    let (link, _servers) = start_chain().await;

    link.run_round(5, Vec::new()).await.unwrap();
    let err = link.run_round(5, Vec::new()).await.unwrap_err();
    assert!(err.to_string().contains("already completed"), "got: {err}");
}

#[tokio::test]
async fn noisy_chain_preserves_order_and_count() {
    // Head injects Laplace(5, 1) covers; the client-visible contract must
    // not change: same count, same order, bit-exact payloads.
    let mut rng = rand::thread_rng();
    let head_keys = KeyPair::generate(&mut rng);
    let tail_keys = KeyPair::generate(&mut rng);

    let tail = ConvoService::new(
        ServiceConfig { server_name: "tail".into(), laplace: quiet(), hops_after: 0 },
        tail_keys.private.clone(),
        None,
    );
    let tail_addr = spawn_mix(tail).await;
    let tail_link = RpcLink::dial(&tail_addr.to_string(), 1).await.unwrap();

    let head = ConvoService::new(
        ServiceConfig {
            server_name: "head".into(),
            laplace: Laplace { mu: 5.0, b: 1.0 },
            hops_after: 1,
        },
        head_keys.private.clone(),
        Some(Box::new(tail_link)),
    );
    let head_addr = spawn_mix(head).await;
    let link = RpcLink::dial(&head_addr.to_string(), 1).await.unwrap();

    let servers = vec![head_keys, tail_keys];
    for round in 0..20u32 {
        let mut onions = Vec::new();
        let mut keys = Vec::new();
        let mut msgs = Vec::new();
        for i in 0..4u8 {
            let drop = DeadDrop::random(&mut rand::thread_rng());
            let msg = [i.wrapping_add(round as u8); SIZE_ENCRYPTED_MESSAGE];
            let (onion, k) = seal_for_chain(drop, msg, round, &servers);
            onions.push(onion);
            keys.push(k);
            msgs.push(msg);
        }

        let replies = link.run_round(round, onions).await.unwrap();
        assert_eq!(replies.len(), 4);
        for i in 0..4 {
            let opened =
                onion_open_reply(&replies[i], &backward_nonce(round), &keys[i]).unwrap();
            assert_eq!(opened, msgs[i].to_vec(), "slot {i} corrupted in round {round}");
        }
    }
}
