//! Murmur mix server binary.
//!
//! # Usage
//!
//! ```bash
//! # Create a default config with fresh keys
//! murmur-mix --conf confs/alpha.json --init --name alpha
//!
//! # Run
//! murmur-mix --conf confs/alpha.json --pki confs/pki.json
//! ```

use std::sync::Arc;

use clap::Parser;
use murmur_mix::{serve, ConvoService, MixConf, NextHop, RpcLink, ServiceConfig};
use murmur_pki::{read_json_file, Pki};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Murmur mix server
#[derive(Parser, Debug)]
#[command(name = "murmur-mix")]
#[command(about = "Mix server for the murmur conversation network")]
#[command(version)]
struct Args {
    /// Path to the mix config file
    #[arg(long)]
    conf: String,

    /// Path to the PKI file
    #[arg(long, default_value = "confs/pki.json")]
    pki: String,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,

    /// Server name for --init
    #[arg(long, default_value = "mix")]
    name: String,

    /// Override convo_mu from the config file
    #[arg(long)]
    mu: Option<f64>,

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

    if args.init {
        MixConf::write_default(&args.conf, &args.name)?;
        println!("wrote {}", args.conf);
        return Ok(());
    }

    let mut conf: MixConf = read_json_file(&args.conf)?;
    if let Some(mu) = args.mu {
        conf.convo_mu = mu;
    }

    let pki = Pki::load(&args.pki)?;
    let hops_after = pki.hops_after(&conf.server_name)?;

    let next: Option<Box<dyn NextHop>> = match pki.next_server(&conf.server_name)? {
        Some(successor) => {
            // The tail serializes rounds behind its idle gate; one
            // connection into it is enough.
            let pool_size = if successor.name == pki.last_server().name {
                1
            } else {
                num_cpus::get()
            };
            tracing::info!(
                next = %successor.name,
                addr = %successor.addr,
                pool = pool_size,
                "dialing next mix"
            );
            let link = RpcLink::dial_retry(&successor.addr, pool_size).await;
            Some(Box::new(link))
        }
        None => {
            tracing::info!("chain tail: performing dead-drop exchange");
            None
        }
    };

    let service = Arc::new(ConvoService::new(
        ServiceConfig {
            server_name: conf.server_name.clone(),
            laplace: conf.laplace(),
            hops_after,
        },
        conf.private_key.clone(),
        next,
    ));

    let listener = TcpListener::bind(conf.listen_addr()).await?;
    tracing::info!(
        server = %conf.server_name,
        addr = %listener.local_addr()?,
        mu = conf.convo_mu,
        b = conf.convo_b,
        "mix server listening"
    );

    serve(listener, service).await?;
    Ok(())
}
