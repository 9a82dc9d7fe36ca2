//! The session connection: one relay transport and everything riding on it
//!
//! A [`SessionConnection`] is driven by a single task. It opens a transport
//! when given an address, keeps it alive with heartbeats, upgrades to
//! encryption when the PC announces its key, applies token rotations, and
//! reports every state change to its [`Notifier`].
//!
//! It never reconnects on its own. Once the transport is gone the state stays
//! `Closed` until [`connect`](SessionConnection::connect) is called again;
//! re-establishment is a user decision (new invite, new relay entry), so a
//! rotated-away token is never replayed blindly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::address::{AddressBook, AddressError, SessionAddress};
use super::events::{Notifier, SessionEvent};
use super::pipeline::{self, CLOSE_MESSAGE};
use super::state::ConnectionState;
use crate::crypto::{CryptoError, PeerPublicKey, SharedKeyCache};
use crate::identity::ClientIdentity;
use crate::transport::{CloseInfo, Connector, Transport, TransportError, TransportResult};

/// Default heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

/// Heartbeat request body
pub const PING_MESSAGE: &str = r#"{"type":"ping"}"#;

/// Heartbeat response body; matching frames are swallowed
pub const PONG_MESSAGE: &str = r#"{"type":"pong"}"#;

/// Close code used when the client ends the session
pub const NORMAL_CLOSURE: u16 = 1000;

/// Session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Time between pings while the connection is open
    pub heartbeat_interval: Duration,
    /// Frame sent as ping
    pub ping_message: String,
    /// Frame expected as pong
    ///
    /// A missing pong is not acted upon; liveness is left to the transport.
    pub pong_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            ping_message: PING_MESSAGE.to_string(),
            pong_message: PONG_MESSAGE.to_string(),
        }
    }
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// The operation needs an open connection
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// There is no relay address to connect to
    #[error("No relay address")]
    NoAddress,

    /// The relay address is unusable
    #[error(transparent)]
    Address(#[from] AddressError),

    /// The transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message could not be encoded
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

enum Wake {
    Frame(TransportResult<String>),
    Heartbeat,
}

/// One relay connection with opportunistic end-to-end encryption
pub struct SessionConnection<C: Connector> {
    connector: C,
    identity: ClientIdentity,
    addresses: AddressBook,
    config: SessionConfig,
    notifier: Arc<dyn Notifier>,

    state: ConnectionState,
    active: Option<SessionAddress>,
    transport: Option<C::Transport>,
    heartbeat: Option<Interval>,
    keys: SharedKeyCache,
    close: Option<CloseInfo>,
    last_message: Option<Value>,
}

impl<C: Connector> SessionConnection<C> {
    /// Create an idle session
    pub fn new(
        connector: C,
        identity: ClientIdentity,
        addresses: AddressBook,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        SessionConnection {
            connector,
            identity,
            addresses,
            config: SessionConfig::default(),
            notifier,
            state: ConnectionState::Uninstantiated,
            active: None,
            transport: None,
            heartbeat: None,
            keys: SharedKeyCache::new(),
            close: None,
            last_message: None,
        }
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// How the last connection ended
    pub fn close_info(&self) -> Option<&CloseInfo> {
        self.close.as_ref()
    }

    /// Whether traffic is currently encrypted
    pub fn has_shared_key(&self) -> bool {
        self.keys.key().is_some()
    }

    /// The PC's public key, once announced on this connection
    pub fn peer_public_key(&self) -> Option<&PeerPublicKey> {
        self.keys.peer()
    }

    /// Address of the current (or last) connection
    pub fn address(&self) -> Option<&SessionAddress> {
        self.active.as_ref()
    }

    /// The shared address book this session reads and rotates
    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }

    /// Most recent message surfaced by [`next_message`](Self::next_message)
    pub fn last_message(&self) -> Option<&Value> {
        self.last_message.as_ref()
    }

    /// Open a connection to `address`
    ///
    /// The address becomes the address book's current one. Any existing
    /// connection is shut down first. Transport failures do not produce an
    /// error: the state becomes `Closed` and the close info says why.
    pub async fn connect(&mut self, address: SessionAddress) -> SessionResult<()> {
        if address.is_empty() {
            return Err(SessionError::NoAddress);
        }

        let url = address.connect_url(&self.identity.public_key_hex())?;

        if self.transport.is_some() || self.state == ConnectionState::Connecting {
            self.shutdown().await;
        }

        if self.addresses.current().as_ref() != Some(&address) {
            if let Err(e) = self.addresses.replace(address.clone()) {
                warn!("Failed to persist relay address: {}", e);
            }
        }

        self.active = Some(address);
        self.close = None;
        self.keys.clear();
        self.transition(ConnectionState::Connecting, true);

        match self.connector.connect(&url).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.heartbeat = Some(self.new_heartbeat());
                self.transition(ConnectionState::Open, false);
                self.notify(SessionEvent::AwaitingKey { url: self.base_url() });
            }
            Err(e) => {
                warn!("Failed to open relay connection to {}: {}", self.base_url(), e);
                self.close = Some(e.close_info());
                self.transition(ConnectionState::Closed, false);
            }
        }

        Ok(())
    }

    /// Connect to whatever address the address book currently holds
    ///
    /// This picks up rotated tokens.
    pub async fn connect_current(&mut self) -> SessionResult<()> {
        let address = self.addresses.current().ok_or(SessionError::NoAddress)?;
        self.connect(address).await
    }

    /// Send a JSON message to the PC
    ///
    /// Encrypted and wrapped when a shared key exists, verbatim otherwise.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, payload: &T) -> SessionResult<()> {
        if !self.state.is_open() {
            return Err(SessionError::NotConnected(self.state));
        }

        let key = self.keys.key();
        let text = pipeline::encode_outbound(payload, key)?;
        if key.is_some() {
            debug!("Sending encrypted message ({} bytes)", text.len());
        } else {
            debug!("No shared key, sending raw message: {}", text);
        }

        self.send_text(&text).await
    }

    /// Wait for the next message from the PC
    ///
    /// Heartbeats are sent while waiting. Returns `None` once the connection
    /// is no longer open.
    pub async fn next_message(&mut self) -> Option<Value> {
        loop {
            let wake = {
                let (Some(transport), Some(heartbeat)) =
                    (self.transport.as_mut(), self.heartbeat.as_mut())
                else {
                    return None;
                };

                tokio::select! {
                    frame = transport.receive() => Wake::Frame(frame),
                    _ = heartbeat.tick() => Wake::Heartbeat,
                }
            };

            match wake {
                Wake::Frame(Ok(text)) => {
                    if let Some(message) = self.handle_frame(&text) {
                        return Some(message);
                    }
                }
                Wake::Frame(Err(e)) => {
                    self.transport_lost(e);
                    return None;
                }
                Wake::Heartbeat => {
                    trace!("Sending heartbeat");
                    let ping = self.config.ping_message.clone();
                    if self.send_text(&ping).await.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Tear the connection down
    ///
    /// When open, a best-effort `"close"` message goes out first (encrypted if
    /// a key exists). The peer key and shared key are forgotten.
    pub async fn shutdown(&mut self) {
        if self.state.is_open() {
            if let Err(e) = self.send_json(CLOSE_MESSAGE).await {
                debug!("Failed to send close message: {}", e);
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if self.state.is_open() {
                self.transition(ConnectionState::Closing, false);
            }
            if let Err(e) = transport.close().await {
                debug!("Error while closing transport: {}", e);
            }
        }

        self.heartbeat = None;
        self.keys.clear();

        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        ) {
            self.close = Some(CloseInfo::new(NORMAL_CLOSURE, ""));
            self.transition(ConnectionState::Closed, false);
        }
    }

    fn handle_frame(&mut self, text: &str) -> Option<Value> {
        if text == self.config.pong_message {
            trace!("Heartbeat pong received");
            return None;
        }

        let inbound = pipeline::decode_inbound(text, self.keys.key());
        if !self.has_shared_key() {
            debug!("Received message: {}", text);
        }
        let message = inbound.into_message()?;

        if let Some(announced) = pipeline::handshake_peer(&message) {
            match announced {
                Ok(peer) => self.establish(peer),
                Err(e) => warn!("Ignoring key announcement with malformed key: {}", e),
            }
        }

        if let Some(token) = pipeline::rotated_token(&message) {
            self.rotate_token(token);
        }

        self.last_message = Some(message.clone());
        Some(message)
    }

    fn rotate_token(&mut self, token: &str) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.token() == Some(token) {
            return;
        }

        let rotated = active.with_token(token);
        let connected = std::mem::replace(active, rotated);

        info!("Received new session token, updating storage");
        if self.addresses.rotate_token(&connected, token).is_none() {
            debug!("Address book holds another relay; new token kept for this connection");
        }
        self.notify(SessionEvent::TokenRotated);
    }

    fn establish(&mut self, peer: PeerPublicKey) {
        let (_, derived) = self.keys.get_or_derive(&peer, self.identity.keypair());
        if derived {
            info!("Shared key established with PC {:?}", peer);
            self.notify(SessionEvent::KeyEstablished {
                peer_public_key: peer.to_hex(),
            });
        }
    }

    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(SessionError::NotConnected(self.state));
        };

        match transport.send(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.transport_lost(e.clone());
                Err(e.into())
            }
        }
    }

    fn transport_lost(&mut self, error: TransportError) {
        info!("WebSocket closed: {}", error);
        debug!("Not reconnecting; a new address is required");

        self.transport = None;
        self.heartbeat = None;
        self.keys.clear();
        self.close = Some(error.close_info());
        if self.state.is_open() {
            self.transition(ConnectionState::Closing, false);
        }
        self.transition(ConnectionState::Closed, false);
    }

    fn transition(&mut self, next: ConnectionState, explicit: bool) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition(next, explicit) {
            warn!("Ignoring invalid state transition {} -> {}", self.state, next);
            return;
        }

        info!("Connection state {} -> {}", self.state, next);
        self.state = next;

        let close = match next {
            ConnectionState::Closed => self.close.clone(),
            _ => None,
        };
        self.notify(SessionEvent::StateChanged {
            state: next,
            url: self.base_url(),
            close,
        });
    }

    fn notify(&self, event: SessionEvent) {
        self.notifier.notify(&event);
    }

    fn base_url(&self) -> String {
        self.active
            .as_ref()
            .map(|address| address.base.clone())
            .unwrap_or_default()
    }

    fn new_heartbeat(&self) -> Interval {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BoxCipher, CipherBlob, ClientKeyPair};
    use crate::session::events::RecordingNotifier;
    use crate::session::pipeline::{EncryptedEnvelope, HANDSHAKE_MESSAGE};
    use crate::storage::MemoryStorage;
    use crate::transport::memory::{MemoryConnector, MemoryTransport};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct Harness {
        session: SessionConnection<MemoryConnector>,
        connector: MemoryConnector,
        identity: ClientIdentity,
        events: RecordingNotifier,
    }

    fn harness() -> Harness {
        let connector = MemoryConnector::new();
        let identity = ClientIdentity::new(ClientKeyPair::generate());
        let addresses = AddressBook::new(Arc::new(MemoryStorage::new()));
        let events = RecordingNotifier::new();
        let session = SessionConnection::new(
            connector.clone(),
            identity.clone(),
            addresses,
            Arc::new(events.clone()),
        );

        Harness {
            session,
            connector,
            identity,
            events,
        }
    }

    fn address(token: &str) -> SessionAddress {
        SessionAddress::parse(&format!("wss://relay.example/ws?token={token}")).unwrap()
    }

    fn states(events: &[SessionEvent]) -> Vec<ConnectionState> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    async fn open(h: &mut Harness, token: &str) -> MemoryTransport {
        let pc = h.connector.queue_pair();
        h.session.addresses().replace(address(token)).unwrap();
        h.session.connect(address(token)).await.unwrap();
        pc
    }

    async fn announce(pc: &mut MemoryTransport, pc_keys: &ClientKeyPair) {
        let frame = json!({
            "from": {"type": "pc", "id": 0},
            "payload": {"message": HANDSHAKE_MESSAGE, "public_key": pc_keys.public_key().to_hex()}
        });
        pc.send(&frame.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_reaches_open() {
        let mut h = harness();
        assert_eq!(h.session.state(), ConnectionState::Uninstantiated);

        let _pc = open(&mut h, "t1").await;

        assert_eq!(h.session.state(), ConnectionState::Open);
        assert_eq!(
            states(&h.events.events()),
            vec![ConnectionState::Connecting, ConnectionState::Open]
        );
        assert!(h
            .events
            .events()
            .contains(&SessionEvent::AwaitingKey { url: "wss://relay.example/ws".into() }));
    }

    #[tokio::test]
    async fn test_connect_url_carries_public_key_and_token() {
        let mut h = harness();
        let _pc = open(&mut h, "t1").await;

        let url = &h.connector.urls()[0];
        let query: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(query["publicKey"], h.identity.public_key_hex());
        assert_eq!(query["token"], "t1");
    }

    #[tokio::test]
    async fn test_empty_address_rejected() {
        let mut h = harness();
        let empty = SessionAddress {
            base: String::new(),
            params: BTreeMap::new(),
        };

        assert!(matches!(h.session.connect(empty).await, Err(SessionError::NoAddress)));
        assert_eq!(h.session.state(), ConnectionState::Uninstantiated);
        assert!(matches!(
            h.session.connect_current().await,
            Err(SessionError::NoAddress)
        ));
    }

    #[tokio::test]
    async fn test_refused_connection_closes_without_retry() {
        let mut h = harness();
        h.session.connect(address("t1")).await.unwrap();

        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert!(h.session.close_info().unwrap().reason.is_some());
        assert_eq!(h.connector.urls().len(), 1);
        assert_eq!(h.session.next_message().await, None);
        assert_eq!(h.connector.urls().len(), 1);
    }

    #[tokio::test]
    async fn test_plaintext_before_handshake() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;

        h.session.send_json(&json!({"stroke": "KAT"})).await.unwrap();
        assert_eq!(pc.receive().await.unwrap(), r#"{"stroke":"KAT"}"#);

        pc.send(r#"{"hello":"tablet"}"#).await.unwrap();
        assert_eq!(h.session.next_message().await, Some(json!({"hello": "tablet"})));
        assert_eq!(h.session.last_message(), Some(&json!({"hello": "tablet"})));
    }

    #[tokio::test]
    async fn test_handshake_upgrades_to_encryption() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;
        let pc_keys = ClientKeyPair::generate();

        announce(&mut pc, &pc_keys).await;
        assert!(h.session.next_message().await.is_some());
        assert!(h.session.has_shared_key());
        assert_eq!(h.session.peer_public_key(), Some(pc_keys.public_key()));

        h.session.send_json(&json!({"stroke": "KAT"})).await.unwrap();
        let frame = pc.receive().await.unwrap();
        let envelope: EncryptedEnvelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(envelope.to.kind, "pc");

        let pc_shared = pc_keys.shared_key(h.identity.public_key());
        let opened: Value = BoxCipher::decrypt_json(&pc_shared, &envelope.payload).unwrap();
        assert_eq!(opened, json!({"stroke": "KAT"}));
    }

    #[tokio::test]
    async fn test_repeated_handshake_derives_once() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;
        let pc_keys = ClientKeyPair::generate();

        announce(&mut pc, &pc_keys).await;
        announce(&mut pc, &pc_keys).await;
        h.session.next_message().await.unwrap();
        h.session.next_message().await.unwrap();

        let established = h
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::KeyEstablished { .. }))
            .count();
        assert_eq!(established, 1);
    }

    #[tokio::test]
    async fn test_encrypted_inbound_and_fallback() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;
        let pc_keys = ClientKeyPair::generate();
        announce(&mut pc, &pc_keys).await;
        h.session.next_message().await.unwrap();

        let pc_shared = pc_keys.shared_key(h.identity.public_key());
        let blob: CipherBlob = BoxCipher::encrypt_json(&pc_shared, &json!({"mode": "draw"}), None).unwrap();
        pc.send(&json!({"from": {"type": "pc", "id": 0}, "payload": blob}).to_string())
            .await
            .unwrap();
        assert_eq!(h.session.next_message().await, Some(json!({"mode": "draw"})));

        // Not ciphertext for us: surfaced as plaintext
        pc.send(r#"{"payload":{"nonce":"AAAA","ciphertext":"AAAA"}}"#).await.unwrap();
        assert_eq!(
            h.session.next_message().await,
            Some(json!({"payload": {"nonce": "AAAA", "ciphertext": "AAAA"}}))
        );
    }

    #[tokio::test]
    async fn test_unparsable_frames_are_dropped() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;

        pc.send("definitely not json").await.unwrap();
        pc.send(r#"{"ok":true}"#).await.unwrap();

        assert_eq!(h.session.next_message().await, Some(json!({"ok": true})));
        assert_eq!(h.session.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_pong_is_swallowed() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;

        pc.send(PONG_MESSAGE).await.unwrap();
        pc.send(r#"{"after":"pong"}"#).await.unwrap();

        assert_eq!(h.session.next_message().await, Some(json!({"after": "pong"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_every_interval() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;

        let reader = tokio::spawn(async move {
            let first = pc.receive().await.unwrap();
            let second = pc.receive().await.unwrap();
            pc.send(r#"{"done":true}"#).await.unwrap();
            (first, second, pc)
        });

        let started = Instant::now();
        // The PC only answers after two pings, so this returns after ~60s
        assert_eq!(h.session.next_message().await, Some(json!({"done": true})));
        assert!(started.elapsed() >= HEARTBEAT_INTERVAL * 2);

        let (first, second, _pc) = reader.await.unwrap();
        assert_eq!(first, PING_MESSAGE);
        assert_eq!(second, PING_MESSAGE);
    }

    #[tokio::test]
    async fn test_token_rotation() {
        let mut h = harness();
        let mut pc = open(&mut h, "A").await;

        pc.send(r#"{"newTabletToken":"B"}"#).await.unwrap();
        h.session.next_message().await.unwrap();

        assert_eq!(h.session.addresses().current().unwrap().token(), Some("B"));
        assert_eq!(h.session.address().unwrap().token(), Some("B"));
        assert_eq!(h.events.take().last(), Some(&SessionEvent::TokenRotated));

        // Same token again: nothing happens
        pc.send(r#"{"newTabletToken":"B"}"#).await.unwrap();
        h.session.next_message().await.unwrap();
        assert!(!h.events.events().contains(&SessionEvent::TokenRotated));
    }

    #[tokio::test]
    async fn test_rotation_patches_connected_address() {
        let mut h = harness();
        h.session
            .addresses()
            .set_relay("wss://old.example/ws?token=A&room=1")
            .unwrap();

        let mut pc = h.connector.queue_pair();
        let target = SessionAddress::parse("wss://new.example/ws?token=X&lane=9").unwrap();
        h.session.connect(target).await.unwrap();
        assert_eq!(
            h.session.addresses().current().unwrap().base,
            "wss://new.example/ws"
        );

        pc.send(r#"{"newTabletToken":"B"}"#).await.unwrap();
        h.session.next_message().await.unwrap();

        let expected = SessionAddress {
            base: "wss://new.example/ws".to_string(),
            params: [("token", "B"), ("lane", "9")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        assert_eq!(h.session.address(), Some(&expected));
        assert_eq!(h.session.addresses().current(), Some(expected));
    }

    #[tokio::test]
    async fn test_rotation_after_book_moved_on() {
        let mut h = harness();
        let mut pc = open(&mut h, "A").await;
        let other = h
            .session
            .addresses()
            .set_relay("wss://other.example/ws?token=Z")
            .unwrap();

        pc.send(r#"{"newTabletToken":"B"}"#).await.unwrap();
        h.session.next_message().await.unwrap();

        assert_eq!(h.session.address().unwrap().base, "wss://relay.example/ws");
        assert_eq!(h.session.address().unwrap().token(), Some("B"));
        assert_eq!(h.session.addresses().current(), Some(other));
        assert!(h.events.events().contains(&SessionEvent::TokenRotated));
    }

    #[tokio::test]
    async fn test_transport_close_reaches_closed() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;
        let pc_keys = ClientKeyPair::generate();
        announce(&mut pc, &pc_keys).await;
        h.session.next_message().await.unwrap();

        pc.close_with(CloseInfo::new(4001, "token expired")).await.unwrap();

        assert_eq!(h.session.next_message().await, None);
        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert!(!h.session.has_shared_key());
        assert!(h.session.peer_public_key().is_none());
        assert_eq!(h.session.close_info(), Some(&CloseInfo::new(4001, "token expired")));
        assert_eq!(
            states(&h.events.events()),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closing,
                ConnectionState::Closed
            ]
        );
        assert_eq!(
            h.events.events().last(),
            Some(&SessionEvent::StateChanged {
                state: ConnectionState::Closed,
                url: "wss://relay.example/ws".into(),
                close: Some(CloseInfo::new(4001, "token expired")),
            })
        );

        // Still closed; no reconnect attempt was made
        assert_eq!(h.session.next_message().await, None);
        assert_eq!(h.connector.urls().len(), 1);
        assert!(matches!(
            h.session.send_json(&json!(1)).await,
            Err(SessionError::NotConnected(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_uses_rotated_token() {
        let mut h = harness();
        let mut pc = open(&mut h, "A").await;
        pc.send(r#"{"newTabletToken":"B"}"#).await.unwrap();
        h.session.next_message().await.unwrap();
        pc.close_with(CloseInfo::new(1001, "")).await.unwrap();
        assert_eq!(h.session.next_message().await, None);

        let _pc2 = h.connector.queue_pair();
        h.session.connect_current().await.unwrap();

        assert_eq!(h.session.state(), ConnectionState::Open);
        let query: BTreeMap<String, String> =
            h.connector.urls()[1].query_pairs().into_owned().collect();
        assert_eq!(query["token"], "B");
    }

    #[tokio::test]
    async fn test_shutdown_sends_close() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;

        h.session.shutdown().await;

        assert_eq!(pc.receive().await.unwrap(), r#""close""#);
        assert_eq!(h.session.state(), ConnectionState::Closed);
        assert_eq!(
            states(&h.events.events()),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closing,
                ConnectionState::Closed
            ]
        );
    }

    #[tokio::test]
    async fn test_shutdown_close_is_encrypted_after_handshake() {
        let mut h = harness();
        let mut pc = open(&mut h, "t1").await;
        let pc_keys = ClientKeyPair::generate();
        announce(&mut pc, &pc_keys).await;
        h.session.next_message().await.unwrap();

        h.session.shutdown().await;

        let envelope: EncryptedEnvelope = serde_json::from_str(&pc.receive().await.unwrap()).unwrap();
        let pc_shared = pc_keys.shared_key(h.identity.public_key());
        let opened: Value = BoxCipher::decrypt_json(&pc_shared, &envelope.payload).unwrap();
        assert_eq!(opened, json!("close"));
    }

    #[tokio::test]
    async fn test_new_address_replaces_connection() {
        let mut h = harness();
        let mut first = open(&mut h, "t1").await;

        let _second = h.connector.queue_pair();
        h.session.connect(address("t2")).await.unwrap();

        // The first transport got the close message, then was released
        assert_eq!(first.receive().await.unwrap(), r#""close""#);
        assert!(first.receive().await.is_err());
        assert_eq!(h.session.state(), ConnectionState::Open);
        assert_eq!(h.session.address().unwrap().token(), Some("t2"));
    }

    #[tokio::test]
    async fn test_shutdown_when_idle_is_noop() {
        let mut h = harness();
        h.session.shutdown().await;

        assert_eq!(h.session.state(), ConnectionState::Uninstantiated);
        assert!(h.events.events().is_empty());
    }
}
