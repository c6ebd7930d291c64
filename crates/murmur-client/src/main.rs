//! Murmur terminal chat client.
//!
//! # Usage
//!
//! ```bash
//! # Create a config with fresh keys
//! murmur-client --conf confs/alice.json --init --name alice
//!
//! # Talk to bob (names resolve through the PKI)
//! murmur-client --conf confs/alice.json --pki confs/pki.json --peer bob
//! ```
//!
//! Reads lines from stdin; each line is queued as one message and rides
//! out in the next available round. With `--peer` set to your own name the
//! client talks to itself, which exercises the full chain.

use std::sync::Arc;

use clap::Parser;
use murmur_client::{Client, Conversation};
use murmur_crypto::{KeyPair, PrivateKey, PublicKey};
use murmur_pki::{read_json_file, write_json_file, Pki};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Client configuration file.
#[derive(Debug, Serialize, Deserialize)]
struct Conf {
    my_name: String,
    my_public_key: PublicKey,
    my_private_key: PrivateKey,
}

/// Murmur chat client
#[derive(Parser, Debug)]
#[command(name = "murmur-client")]
#[command(about = "Terminal chat client for the murmur conversation network")]
#[command(version)]
struct Args {
    /// Path to the client config file
    #[arg(long, default_value = "confs/client.json")]
    conf: String,

    /// Path to the PKI file
    #[arg(long, default_value = "confs/pki.json")]
    pki: String,

    /// Peer name as registered in the PKI
    #[arg(long)]
    peer: Option<String>,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,

    /// User name for --init
    #[arg(long, default_value = "me")]
    name: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    if args.init {
        let keys = KeyPair::generate(&mut rand::thread_rng());
        let conf = Conf {
            my_name: args.name.clone(),
            my_public_key: keys.public,
            my_private_key: keys.private,
        };
        write_json_file(&args.conf, &conf)?;
        println!("wrote {}", args.conf);
        return Ok(());
    }

    let conf: Conf = read_json_file(&args.conf)?;
    let pki = Pki::load(&args.pki)?;

    let peer_name = args.peer.as_deref().unwrap_or(&conf.my_name);
    let peer_public_key = pki.person(peer_name)?;

    let (conversation, mut deliveries) = Conversation::new(
        peer_name,
        &conf.my_private_key,
        peer_public_key,
        pki.server_keys(),
    );
    let conversation = Arc::new(conversation);

    let client = Arc::new(Client::new(pki.entry_server.clone(), conf.my_public_key));
    client.set_handler(Arc::clone(&conversation) as Arc<dyn murmur_client::ConvoHandler>);

    let incoming = client.connect().await?;
    println!("connected to coordinator at {}", pki.entry_server);
    println!("now talking to {peer_name}");

    // Print peer messages as they arrive.
    tokio::spawn(async move {
        while let Some(message) = deliveries.recv().await {
            println!("<{}> {}", message.peer, message.text);
        }
    });

    // Queue one message per stdin line.
    let stdin_convo = Arc::clone(&conversation);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            if stdin_convo.queue_message(line.into_bytes()).await.is_err() {
                break;
            }
        }
    });

    client.run(incoming).await?;
    println!("session closed");
    Ok(())
}
