//! # Tablet Link
//!
//! Session and encryption layer for a display client (the "tablet") paired
//! with a PC through an untrusted WebSocket relay.
//!
//! ## Features
//!
//! - **Persistent identity**: an X25519 keypair generated once and kept in
//!   local storage
//! - **End-to-end encryption**: NaCl box (X25519 + XSalsa20-Poly1305) once the
//!   PC announces its key, plaintext until then
//! - **Token rotation**: the PC can push a fresh relay token at any time
//! - **Pluggable transport**: WebSocket for the relay, in-memory for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tablet_link::{
//!     AddressBook, ClientIdentity, FileStorage, KeyStore, SessionConnection,
//!     TracingNotifier, WebSocketConnector,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let storage = Arc::new(FileStorage::new("/tmp/tablet-link"));
//! let identity = ClientIdentity::bootstrap(&KeyStore::new(storage.clone()))?;
//! let addresses = AddressBook::restore(storage);
//! let address = addresses.set_relay("wss://relay.example/ws?token=abc")?;
//!
//! let mut session = SessionConnection::new(
//!     WebSocketConnector,
//!     identity,
//!     addresses,
//!     Arc::new(TracingNotifier),
//! );
//! session.connect(address).await?;
//! session.send_json(&serde_json::json!({"stroke": "KAT"})).await?;
//! while let Some(message) = session.next_message().await {
//!     println!("{message}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │        CLI  |  Display UI  |  Notifier      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │               SESSION LAYER                 │
//! │ Address book | State machine | Pipeline     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │           CRYPTO / STORAGE LAYER            │
//! │  X25519 | XSalsa20-Poly1305 | Key store     │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │          WebSocket  |  In-memory            │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod crypto;
pub mod identity;
pub mod keystore;
pub mod session;
pub mod storage;
pub mod transport;

// Re-export main types at crate root
pub use crypto::{ClientKeyPair, CryptoError, CryptoResult, PeerPublicKey, PublicKey};
pub use identity::ClientIdentity;
pub use keystore::KeyStore;
pub use session::{
    AddressBook, ConnectionState, SessionAddress, SessionConfig, SessionConnection, SessionError,
    SessionEvent, TracingNotifier,
};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use transport::{CloseInfo, Connector, Transport, WebSocketConnector};
