//! Tablet Link CLI
//!
//! Manages the client identity and relay address, and runs an interactive
//! session with the PC: every line typed on stdin is sent as JSON, every
//! message from the PC is printed on stdout.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tablet_link::{
    AddressBook, ClientIdentity, ClientKeyPair, FileStorage, KeyStore, SessionAddress,
    SessionConnection, Storage, TracingNotifier, WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tablet Link: encrypted display session with a PC over a relay
#[derive(Parser)]
#[command(name = "tablet-link")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the keypair and relay address (default: ~/.tablet-link)
    #[arg(short, long, env = "TABLET_LINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair, replacing the stored one
    Init {
        /// Overwrite an existing keypair
        #[arg(short, long)]
        force: bool,
    },

    /// Display your public key (generating a keypair if none exists)
    Identity,

    /// Store a relay URL as the session address
    Relay {
        /// Relay WebSocket URL, e.g. wss://relay.example/ws?token=...
        url: String,
    },

    /// Store the relay carried by an invite link
    Invite {
        /// Invite URL with a `relay` query parameter
        url: String,
    },

    /// Show the stored session address
    Status,

    /// Forget the stored session address
    Forget,

    /// Connect and relay stdin/stdout to the PC
    Connect {
        /// Relay URL to use instead of the stored one
        #[arg(long, conflicts_with = "invite")]
        relay: Option<String>,

        /// Invite URL to use instead of the stored address
        #[arg(long)]
        invite: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tablet_link=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(data_dir));

    match cli.command {
        Commands::Init { force } => cmd_init(storage, force),
        Commands::Identity => cmd_identity(storage),
        Commands::Relay { url } => cmd_relay(storage, &url, false),
        Commands::Invite { url } => cmd_relay(storage, &url, true),
        Commands::Status => cmd_status(storage),
        Commands::Forget => {
            AddressBook::restore(storage).clear();
            println!("Session address forgotten.");
            Ok(())
        }
        Commands::Connect { relay, invite } => cmd_connect(storage, relay, invite).await,
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".tablet-link"))
}

fn cmd_init(storage: Arc<dyn Storage>, force: bool) -> Result<()> {
    let keystore = KeyStore::new(storage);
    if keystore.load().is_some() && !force {
        bail!("A keypair already exists. Use --force to replace it.");
    }

    let keypair = ClientKeyPair::generate();
    keystore.save(&keypair).context("Failed to save keypair")?;

    println!("Keypair created successfully!");
    println!();
    println!("Your public key:");
    println!("{}", keypair.public_key().to_hex());
    Ok(())
}

fn cmd_identity(storage: Arc<dyn Storage>) -> Result<()> {
    let identity = ClientIdentity::bootstrap(&KeyStore::new(storage))
        .context("Failed to load or create keypair")?;
    println!("{}", identity.public_key_hex());
    Ok(())
}

fn cmd_relay(storage: Arc<dyn Storage>, url: &str, invite: bool) -> Result<()> {
    let addresses = AddressBook::restore(storage);
    let address = if invite {
        addresses.set_invite(url)?
    } else {
        addresses.set_relay(url)?
    };

    println!("Session address set:");
    print_address(&address);
    Ok(())
}

fn cmd_status(storage: Arc<dyn Storage>) -> Result<()> {
    match AddressBook::restore(storage).current() {
        Some(address) => print_address(&address),
        None => println!("No session address. Use `tablet-link relay <url>` to set one."),
    }
    Ok(())
}

fn print_address(address: &SessionAddress) {
    println!("  Relay: {}", address.base);
    for (name, value) in &address.params {
        if name == "token" {
            println!("  {}: <{} chars>", name, value.len());
        } else {
            println!("  {}: {}", name, value);
        }
    }
}

async fn cmd_connect(
    storage: Arc<dyn Storage>,
    relay: Option<String>,
    invite: Option<String>,
) -> Result<()> {
    let identity = ClientIdentity::bootstrap(&KeyStore::new(storage.clone()))
        .context("Failed to load or create keypair")?;
    let addresses = AddressBook::restore(storage);

    let address = match (relay, invite) {
        (Some(url), _) => addresses.set_relay(&url)?,
        (None, Some(url)) => addresses.set_invite(&url)?,
        (None, None) => match addresses.current() {
            Some(address) => address,
            None => bail!("No session address. Pass --relay or --invite."),
        },
    };

    info!("Public key: {}", identity.public_key_hex());

    let mut session = SessionConnection::new(
        WebSocketConnector,
        identity,
        addresses,
        Arc::new(TracingNotifier),
    );
    session.connect(address).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            message = session.next_message() => match message {
                Some(message) => println!("{}", message),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    // Lines that are not JSON go out as JSON strings
                    let payload = serde_json::from_str(&line).unwrap_or(Value::String(line));
                    session.send_json(&payload).await?;
                }
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                break;
            }
        }
    }

    session.shutdown().await;
    if let Some(close) = session.close_info() {
        info!("Session ended ({})", close);
    }
    Ok(())
}
