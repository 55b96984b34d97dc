//! Murmur daemon binary.
//!
//! # Usage
//!
//! ```bash
//! # Create an account directory
//! murmur-daemon init --root ~/.murmur/alice --name alice \
//!     --server-addr chat.example.org:4680 --server-pub <hex> --registry-pub <hex>
//!
//! # Run it
//! murmur-daemon run --root ~/.murmur/alice
//! ```
//!
//! `init` prints the account's chat profile fields; registering those with
//! the name registry is done with the registry's own tooling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use murmur_daemon::{AccountConfig, paths::Layout};
use murmur_registry::OfflineRegistry;
use rand::rngs::OsRng;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Murmur client daemon
#[derive(Parser, Debug)]
#[command(name = "murmur-daemon")]
#[command(about = "Encrypted messaging daemon: outbox in, conversations out")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Create a new account directory with fresh keys
    Init {
        /// Account root directory
        #[arg(long)]
        root: PathBuf,
        /// Our registered name
        #[arg(long)]
        name: String,
        /// Home server address, host:port
        #[arg(long)]
        server_addr: String,
        /// Home server transport public key (hex)
        #[arg(long)]
        server_pub: String,
        /// Registry verifying key (hex)
        #[arg(long)]
        registry_pub: String,
    },
    /// Run the daemon for an existing account
    Run {
        /// Account root directory
        #[arg(long)]
        root: PathBuf,
    },
}

fn parse_key(hex_str: &str) -> Result<[u8; 32], Box<dyn std::error::Error>> {
    let bytes = hex::decode(hex_str.trim())?;
    let key: [u8; 32] =
        bytes.as_slice().try_into().map_err(|_| "key must be 32 hex-encoded bytes")?;
    Ok(key)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        CliCommand::Init { root, name, server_addr, server_pub, registry_pub } => {
            let layout = Layout::new(root.clone());
            layout.init_fs()?;
            let config = AccountConfig::generate(
                &name,
                &server_addr,
                parse_key(&server_pub)?,
                parse_key(&registry_pub)?,
                &mut OsRng,
            );
            config.save(&layout)?;

            let profile = config.chat_profile();
            tracing::info!(root = %root.display(), %name, "account created");
            tracing::info!(uid = %hex::encode(profile.user_id_at_server), "mailbox uid");
            tracing::info!(
                auth = %hex::encode(profile.message_auth_pub),
                signing = %hex::encode(profile.key_signing_pub),
                "profile keys to register"
            );
            Ok(())
        }
        CliCommand::Run { root } => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let engine = tokio::spawn(murmur_daemon::run(root, OfflineRegistry, shutdown_rx));

            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
            engine.await??;
            Ok(())
        }
    }
}
