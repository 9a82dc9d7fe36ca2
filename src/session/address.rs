//! Relay addresses and the rotating session token
//!
//! A [`SessionAddress`] is the relay URL split into a base and its query
//! parameters. The [`AddressBook`] holds the current one for the session,
//! persists it to session storage, and applies token rotations in place.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::storage::{Storage, StorageError, StorageResult};

/// Session storage key of the persisted address
pub const STORAGE_KEY: &str = "websocketUrl";

/// Query parameter carrying the rotating session credential
pub const TOKEN_PARAM: &str = "token";

/// Query parameter the client adds with its hex public key
pub const PUBLIC_KEY_PARAM: &str = "publicKey";

/// Query parameter of an invite URL that holds the relay URL
pub const RELAY_PARAM: &str = "relay";

/// Address errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not an absolute URL with a host
    #[error("Malformed address: {0}")]
    Malformed(String),

    /// The scheme cannot carry a WebSocket connection
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// An invite URL without a `relay` parameter
    #[error("Invite URL has no relay parameter")]
    MissingRelay,
}

/// Result type for address operations
pub type AddressResult<T> = Result<T, AddressError>;

/// A relay endpoint: base URL plus decoded query parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAddress {
    /// Scheme, host, port and path; no query
    pub base: String,
    /// Query parameters, unique keys
    #[serde(rename = "searchParamsEntries")]
    pub params: BTreeMap<String, String>,
}

impl SessionAddress {
    /// Split an absolute URL into base and parameters
    ///
    /// Duplicate parameters keep the last value.
    pub fn parse(input: &str) -> AddressResult<Self> {
        let url = Url::parse(input.trim()).map_err(|e| AddressError::Malformed(e.to_string()))?;

        if url.host_str().is_none() {
            return Err(AddressError::Malformed(format!("{input:?} has no host")));
        }
        if !matches!(url.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(AddressError::UnsupportedScheme(url.scheme().to_string()));
        }

        let base = format!("{}{}", url.origin().ascii_serialization(), url.path());
        let params = url.query_pairs().into_owned().collect();

        Ok(SessionAddress { base, params })
    }

    /// Extract the relay address from an invite (page or QR code) URL
    pub fn from_invite(input: &str) -> AddressResult<Self> {
        let url = Url::parse(input.trim()).map_err(|e| AddressError::Malformed(e.to_string()))?;
        let relay = url
            .query_pairs()
            .filter(|(key, _)| key == RELAY_PARAM)
            .map(|(_, value)| value.into_owned())
            .last()
            .ok_or(AddressError::MissingRelay)?;

        Self::parse(&relay)
    }

    /// An address is empty when there is nothing to connect to
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// The current session token, if any
    pub fn token(&self) -> Option<&str> {
        self.params.get(TOKEN_PARAM).map(String::as_str)
    }

    /// A copy of this address with the token replaced
    pub fn with_token(&self, token: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.params.insert(TOKEN_PARAM.to_string(), token.into());
        next
    }

    /// The URL to open: base, the client's public key, then the relay params
    ///
    /// Relay params are applied last, so a `publicKey` supplied by the relay
    /// wins. `http`/`https` bases are mapped to `ws`/`wss`.
    pub fn connect_url(&self, public_key_hex: &str) -> AddressResult<Url> {
        let mut url = Url::parse(&self.base).map_err(|e| AddressError::Malformed(e.to_string()))?;

        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            "ws" | "wss" => None,
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| AddressError::UnsupportedScheme(scheme.to_string()))?;
        }

        let mut query = BTreeMap::new();
        query.insert(PUBLIC_KEY_PARAM.to_string(), public_key_hex.to_string());
        query.extend(self.params.clone());

        url.query_pairs_mut().clear().extend_pairs(query);
        Ok(url)
    }
}

/// The session's current relay address, shared between the UI and the connection
///
/// Reads take a snapshot; the token rotation happens under the write lock, so
/// no reader sees a half-updated parameter set.
#[derive(Clone)]
pub struct AddressBook {
    current: Arc<RwLock<Option<SessionAddress>>>,
    storage: Arc<dyn Storage>,
}

impl AddressBook {
    /// An empty address book persisting into `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        AddressBook {
            current: Arc::new(RwLock::new(None)),
            storage,
        }
    }

    /// An address book primed from the address persisted in `storage`
    ///
    /// An unreadable record is discarded.
    pub fn restore(storage: Arc<dyn Storage>) -> Self {
        let restored = match storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<SessionAddress>(&raw) {
                Ok(address) => Some(address),
                Err(e) => {
                    error!("Failed to parse stored relay address, discarding it: {}", e);
                    if let Err(e) = storage.remove(STORAGE_KEY) {
                        warn!("Failed to remove stored relay address: {}", e);
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e @ StorageError::Corrupt { .. }) => {
                error!("Stored relay address is unreadable, discarding it: {}", e);
                if let Err(e) = storage.remove(STORAGE_KEY) {
                    warn!("Failed to remove stored relay address: {}", e);
                }
                None
            }
            Err(e) => {
                warn!("Failed to read stored relay address: {}", e);
                None
            }
        };

        if let Some(address) = &restored {
            debug!("Restored relay address {}", address.base);
        }

        AddressBook {
            current: Arc::new(RwLock::new(restored)),
            storage,
        }
    }

    /// Snapshot of the current address
    pub fn current(&self) -> Option<SessionAddress> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the address wholesale and persist it
    pub fn replace(&self, address: SessionAddress) -> StorageResult<()> {
        let json = serde_json::to_string(&address)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(address);
        self.storage.set(STORAGE_KEY, &json)
    }

    /// Parse a relay URL and make it current
    ///
    /// On a parse error the current address is left untouched.
    pub fn set_relay(&self, relay_url: &str) -> AddressResult<SessionAddress> {
        let address = SessionAddress::parse(relay_url)?;
        self.install(address)
    }

    /// Parse an invite URL (`...?relay=<relay url>`) and make its relay current
    pub fn set_invite(&self, invite_url: &str) -> AddressResult<SessionAddress> {
        let address = SessionAddress::from_invite(invite_url)?;
        self.install(address)
    }

    fn install(&self, address: SessionAddress) -> AddressResult<SessionAddress> {
        if let Err(e) = self.replace(address.clone()) {
            warn!("Failed to persist relay address: {}", e);
        }
        info!("Relay address set to {}", address.base);
        Ok(address)
    }

    /// Apply a token pushed by the PC over a connection to `connected`
    ///
    /// The book is only patched while it still holds `connected`. Returns the
    /// updated address when it was patched, `None` when the token is
    /// unchanged, the book holds another address, or there is none.
    pub fn rotate_token(
        &self,
        connected: &SessionAddress,
        new_token: &str,
    ) -> Option<SessionAddress> {
        let (updated, json) = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            let address = current.as_mut().filter(|address| **address == *connected)?;
            if address.token() == Some(new_token) {
                return None;
            }

            *address = address.with_token(new_token);
            (address.clone(), serde_json::to_string(&*address))
        };

        match json {
            Ok(json) => {
                if let Err(e) = self.storage.set(STORAGE_KEY, &json) {
                    warn!("Failed to persist rotated session token: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize relay address: {}", e),
        }

        Some(updated)
    }

    /// Forget the address
    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Err(e) = self.storage.remove(STORAGE_KEY) {
            warn!("Failed to remove stored relay address: {}", e);
        }
    }
}

impl std::fmt::Debug for AddressBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressBook")
            .field("current", &self.current().map(|a| a.base))
            .finish()
    }
}
