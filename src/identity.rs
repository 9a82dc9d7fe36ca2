//! The client identity shared by every session in this process

use std::sync::Arc;

use crate::crypto::{ClientKeyPair, PeerPublicKey, PublicKey, SharedBoxKey};
use crate::keystore::KeyStore;
use crate::storage::StorageResult;

/// Process-wide client identity, built once at startup and handed to sessions
///
/// Cloning is cheap; all clones share the same keypair.
#[derive(Clone, Debug)]
pub struct ClientIdentity {
    keypair: Arc<ClientKeyPair>,
}

impl ClientIdentity {
    /// Load the identity from `keystore`, generating and saving one if needed
    pub fn bootstrap(keystore: &KeyStore) -> StorageResult<Self> {
        keystore.load_or_generate().map(Self::new)
    }

    /// Wrap an existing keypair
    pub fn new(keypair: ClientKeyPair) -> Self {
        ClientIdentity {
            keypair: Arc::new(keypair),
        }
    }

    /// Our public key
    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    /// Our public key as lowercase hex, the form sent to the relay
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }

    /// The underlying keypair
    pub fn keypair(&self) -> &ClientKeyPair {
        &self.keypair
    }

    /// Precompute the box key shared with `peer`
    pub fn shared_key(&self, peer: &PeerPublicKey) -> SharedBoxKey {
        self.keypair.shared_key(peer)
    }
}
