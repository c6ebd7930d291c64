//! Murmur entry coordinator binary.
//!
//! # Usage
//!
//! ```bash
//! murmur-coordinator --addr 0.0.0.0:33001 --pki confs/pki.json --wait-ms 1000
//! ```

use std::time::Duration;

use clap::Parser;
use murmur_coordinator::{Coordinator, CoordinatorConfig};
use murmur_mix::RpcLink;
use murmur_pki::Pki;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Murmur entry coordinator
#[derive(Parser, Debug)]
#[command(name = "murmur-coordinator")]
#[command(about = "Entry coordinator for the murmur conversation network")]
#[command(version)]
struct Args {
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:33001")]
    addr: String,

    /// Path to the PKI file
    #[arg(long, default_value = "confs/pki.json")]
    pki: String,

    /// How long a round accepts submissions, in milliseconds
    #[arg(long, default_value = "1000")]
    wait_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let pki = Pki::load(&args.pki)?;
    let head = pki.first_server();

    // A single-mix chain makes the head the tail; it serializes rounds,
    // so one connection suffices.
    let pool_size = if head.name == pki.last_server().name { 1 } else { num_cpus::get() };
    tracing::info!(head = %head.name, addr = %head.addr, pool = pool_size, "dialing chain head");

    let link = RpcLink::dial_retry(&head.addr, pool_size).await;

    let listener = TcpListener::bind(&args.addr).await?;
    tracing::info!(addr = %listener.local_addr()?, wait_ms = args.wait_ms, "coordinator listening");

    let coordinator = Coordinator::new(
        Box::new(link),
        CoordinatorConfig { receive_wait: Duration::from_millis(args.wait_ms) },
    );

    coordinator.run(listener).await?;
    Ok(())
}
