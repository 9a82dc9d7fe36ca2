//! Relay session with opportunistic end-to-end encryption
//!
//! The session connects to the relay with the client's public key in the
//! query, waits for the PC to announce its own key, and from then on seals
//! every outbound message into an envelope only the PC can open. Inbound
//! frames are decrypted when they can be and surfaced as plaintext otherwise.
//!
//! # Lifecycle
//!
//! ```text
//! Uninstantiated ──connect──▶ Connecting ──▶ Open ──shutdown / lost──▶ Closing ──▶ Closed
//!                                  │                                              ▲
//!                                  └──────────────────refused─────────────────────┘
//!
//! Closed ──connect(new address)──▶ Connecting
//! ```

pub mod address;
mod connection;
pub mod events;
pub mod pipeline;
mod state;

pub use address::{AddressBook, AddressError, AddressResult, SessionAddress};
pub use connection::{
    SessionConfig, SessionConnection, SessionError, SessionResult, HEARTBEAT_INTERVAL,
    PING_MESSAGE, PONG_MESSAGE,
};
pub use events::{Notice, NoticeLevel, Notifier, RecordingNotifier, SessionEvent, TracingNotifier};
pub use pipeline::{decode_inbound, encode_outbound, Inbound};
pub use state::ConnectionState;
