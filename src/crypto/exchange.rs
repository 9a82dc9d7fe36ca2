//! X25519 key agreement and NaCl box precomputation
//!
//! The client holds one long-lived [`ClientKeyPair`]. When the PC announces its
//! public key, both sides compute the same [`SharedBoxKey`]: the X25519 shared
//! point run through HSalsa20 with a zero input, which is exactly what NaCl's
//! `crypto_box_beforenm` produces. All later traffic uses that key with
//! XSalsa20-Poly1305 (see [`super::cipher`]).

use rand::rngs::OsRng;
use salsa20::cipher::consts::U10;
use salsa20::cipher::generic_array::GenericArray;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use super::encoding::{hex_decode, hex_encode, to_array};
use super::error::{CryptoError, CryptoResult};

/// Size of a public or secret key in bytes
pub const KEY_SIZE: usize = 32;

/// An X25519 public key (ours, or the PC's)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; KEY_SIZE]);

/// The PC's public key, learned from the handshake announcement
pub type PeerPublicKey = PublicKey;

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        to_array(bytes).map(PublicKey)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Convert to lowercase hex
    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// Create from hex
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex_decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The client's long-lived identity keypair
///
/// The secret key is zeroized when dropped and never shown by `Debug`.
#[derive(ZeroizeOnDrop)]
pub struct ClientKeyPair {
    #[zeroize(skip)]
    public_key: PublicKey,
    secret_key: [u8; KEY_SIZE],
}

impl ClientKeyPair {
    /// Generate a fresh keypair from the OS random source
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519Public::from(&secret);

        ClientKeyPair {
            public_key: PublicKey(public.to_bytes()),
            secret_key: secret.to_bytes(),
        }
    }

    /// Rebuild a keypair from stored parts
    ///
    /// Fails with [`CryptoError::KeyPairMismatch`] if the public key was not
    /// derived from the secret key.
    pub fn from_parts(public_key: &[u8], secret_key: &[u8]) -> CryptoResult<Self> {
        let public_key = PublicKey::from_bytes(public_key)?;
        let secret_key: [u8; KEY_SIZE] = to_array(secret_key)?;

        let derived = X25519Public::from(&StaticSecret::from(secret_key));
        if derived.to_bytes() != public_key.0 {
            return Err(CryptoError::KeyPairMismatch);
        }

        Ok(ClientKeyPair {
            public_key,
            secret_key,
        })
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Get the secret key bytes
    ///
    /// Only the key store should need this, to persist the pair.
    pub fn secret_key_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.secret_key
    }

    /// Precompute the box key shared with `peer`
    pub fn shared_key(&self, peer: &PeerPublicKey) -> SharedBoxKey {
        SharedBoxKey::derive(peer, &self.secret_key)
    }
}

impl Clone for ClientKeyPair {
    fn clone(&self) -> Self {
        ClientKeyPair {
            public_key: self.public_key,
            secret_key: self.secret_key,
        }
    }
}

impl PartialEq for ClientKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
            && constant_time_eq(&self.secret_key, &other.secret_key)
    }
}

impl Eq for ClientKeyPair {}

impl std::fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Precomputed symmetric key for box encryption with one peer
#[derive(Clone, ZeroizeOnDrop)]
pub struct SharedBoxKey([u8; KEY_SIZE]);

impl SharedBoxKey {
    /// Derive the box key from the peer's public key and our secret key
    ///
    /// `derive(B.pub, A.sec) == derive(A.pub, B.sec)` for any two keypairs.
    pub fn derive(peer_public: &PeerPublicKey, own_secret: &[u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*own_secret);
        let shared = secret.diffie_hellman(&X25519Public::from(peer_public.0));

        let key = GenericArray::from(shared.to_bytes());
        let zeros = GenericArray::default();
        let derived = salsa20::hsalsa::<U10>(&key, &zeros);

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&derived);
        SharedBoxKey(bytes)
    }

    /// Get the raw bytes (be careful with this!)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for SharedBoxKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SharedBoxKey {}

impl std::fmt::Debug for SharedBoxKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedBoxKey(<redacted>)")
    }
}

/// One-entry memo of the box key for the current peer
///
/// Repeated handshakes from the same peer reuse the derived key; a different
/// peer key replaces it. Cleared when the connection is torn down.
#[derive(Default)]
pub struct SharedKeyCache {
    entry: Option<(PeerPublicKey, SharedBoxKey)>,
}

impl SharedKeyCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the key for `peer`, deriving it only if the peer changed
    ///
    /// The boolean is `true` when a derivation actually happened.
    pub fn get_or_derive(
        &mut self,
        peer: &PeerPublicKey,
        own: &ClientKeyPair,
    ) -> (&SharedBoxKey, bool) {
        let fresh = !matches!(&self.entry, Some((cached, _)) if cached == peer);
        if fresh {
            self.entry = None;
        }
        let (_, key) = self
            .entry
            .get_or_insert_with(|| (*peer, own.shared_key(peer)));
        (key, fresh)
    }

    /// The peer key the cached box key belongs to
    pub fn peer(&self) -> Option<&PeerPublicKey> {
        self.entry.as_ref().map(|(peer, _)| peer)
    }

    /// The cached box key, if a handshake has completed
    pub fn key(&self) -> Option<&SharedBoxKey> {
        self.entry.as_ref().map(|(_, key)| key)
    }

    /// Forget the peer and its key
    pub fn clear(&mut self) {
        self.entry = None;
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
