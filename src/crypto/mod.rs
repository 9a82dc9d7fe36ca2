//! Cryptographic primitives for the session layer
//!
//! This module provides the building blocks the session needs:
//! - `exchange`: X25519 keypairs and NaCl box key precomputation
//! - `cipher`: XSalsa20-Poly1305 encryption of JSON payloads
//! - `encoding`: hex and base64 text encodings

pub mod cipher;
pub mod encoding;
pub mod error;
pub mod exchange;

// Re-export commonly used types
pub use cipher::{new_nonce, BoxCipher, BoxNonce, CipherBlob};
pub use encoding::{base64_decode, base64_encode, hex_decode, hex_encode};
pub use error::{CryptoError, CryptoResult};
pub use exchange::{ClientKeyPair, PeerPublicKey, PublicKey, SharedBoxKey, SharedKeyCache};
