//! Durable storage of the client keypair
//!
//! The record lives under [`STORAGE_KEY`] as
//! `{"publicKey": "<base64>", "secretKey": "<base64>"}`. A record that cannot
//! be decoded is deleted and reported as absent, so the caller generates a
//! fresh identity instead of failing to start.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{base64_decode, base64_encode, ClientKeyPair, CryptoError, CryptoResult};
use crate::storage::{Storage, StorageError, StorageResult};

/// Storage key of the keypair record
pub const STORAGE_KEY: &str = "clientKeyPair";

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct StoredKeyPair {
    public_key: String,
    secret_key: String,
}

impl StoredKeyPair {
    fn encode(keypair: &ClientKeyPair) -> Self {
        StoredKeyPair {
            public_key: base64_encode(keypair.public_key().as_bytes()),
            secret_key: base64_encode(keypair.secret_key_bytes()),
        }
    }

    fn decode(&self) -> CryptoResult<ClientKeyPair> {
        let public_key = base64_decode(&self.public_key)?;
        let mut secret_key = base64_decode(&self.secret_key)?;
        let keypair = ClientKeyPair::from_parts(&public_key, &secret_key);
        secret_key.zeroize();
        keypair
    }
}

/// Loads and saves the one client keypair of this installation
#[derive(Clone)]
pub struct KeyStore {
    storage: Arc<dyn Storage>,
}

impl KeyStore {
    /// Create a key store on top of durable storage
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        KeyStore { storage }
    }

    /// Read the persisted keypair
    ///
    /// Returns `None` when there is no record, or when the record is corrupt
    /// (in which case it is removed). Never fails.
    pub fn load(&self) -> Option<ClientKeyPair> {
        let raw = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e @ StorageError::Corrupt { .. }) => {
                self.discard(&e);
                return None;
            }
            Err(e) => {
                warn!("Failed to read stored client keys: {}", e);
                return None;
            }
        };

        match Self::parse(&raw) {
            Ok(keypair) => Some(keypair),
            Err(e) => {
                self.discard(&e);
                None
            }
        }
    }

    fn discard(&self, reason: &dyn std::fmt::Display) {
        error!("Failed to parse stored client keys, discarding them: {}", reason);
        if let Err(e) = self.storage.remove(STORAGE_KEY) {
            warn!("Failed to remove corrupt client keys: {}", e);
        }
    }

    /// Persist `keypair`, replacing any existing record
    pub fn save(&self, keypair: &ClientKeyPair) -> StorageResult<()> {
        let record = StoredKeyPair::encode(keypair);
        let json = serde_json::to_string(&record)?;
        self.storage.set(STORAGE_KEY, &json)
    }

    /// Load the stored keypair, or generate and save a new one
    ///
    /// An existing valid identity is never replaced.
    pub fn load_or_generate(&self) -> StorageResult<ClientKeyPair> {
        if let Some(keypair) = self.load() {
            return Ok(keypair);
        }

        let keypair = ClientKeyPair::generate();
        self.save(&keypair)?;
        info!("Generated new client keypair {}", keypair.public_key().to_hex());
        Ok(keypair)
    }

    fn parse(raw: &str) -> CryptoResult<ClientKeyPair> {
        let record: StoredKeyPair =
            serde_json::from_str(raw).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        record.decode()
    }
}
