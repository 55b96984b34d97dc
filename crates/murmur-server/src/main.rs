//! Murmur mailbox server binary.
//!
//! # Usage
//!
//! ```bash
//! murmur-server --bind 0.0.0.0:4680 --db mailbox.redb --key-file server.key
//! ```
//!
//! The transport keypair is generated and written to `--key-file` on first
//! run; the public half (which clients put in their profiles) is logged at
//! startup.

use clap::Parser;
use murmur_server::{MailboxStore, Server};
use rand::rngs::OsRng;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use x25519_dalek::{PublicKey, StaticSecret};

/// Murmur mailbox server
#[derive(Parser, Debug)]
#[command(name = "murmur-server")]
#[command(about = "Encrypted mailbox server: envelope storage, prekeys, push")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4680")]
    bind: String,

    /// Path to the mailbox database
    #[arg(short, long, default_value = "mailbox.redb")]
    db: String,

    /// Path to the transport secret key (hex); created on first run
    #[arg(short, long, default_value = "server.key")]
    key_file: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Load the transport secret, generating and persisting one on first run.
fn load_or_create_key(path: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let bytes = hex::decode(contents.trim())?;
            let secret: [u8; 32] =
                bytes.as_slice().try_into().map_err(|_| "key file must hold 32 hex bytes")?;
            Ok(secret)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let secret = StaticSecret::random_from_rng(OsRng);
            std::fs::write(path, hex::encode(secret.to_bytes()))?;
            tracing::info!(path, "generated new transport keypair");
            Ok(secret.to_bytes())
        }
        Err(err) => Err(err.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let secret = load_or_create_key(&args.key_file)?;
    let public = PublicKey::from(&StaticSecret::from(secret));
    tracing::info!(transport_pub = %hex::encode(public.as_bytes()), "server identity");

    let store = MailboxStore::open(&args.db)?;
    let server = Server::start(store, secret, &args.bind).await?;
    tracing::info!(addr = %server.local_addr(), "serving");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
