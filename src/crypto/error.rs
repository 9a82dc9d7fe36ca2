//! Cryptographic error types

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The provided key has an invalid length
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length in bytes
        expected: usize,
        /// Actual key length in bytes
        actual: usize,
    },

    /// The provided nonce has an invalid length
    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength {
        /// Expected nonce length in bytes
        expected: usize,
        /// Actual nonce length in bytes
        actual: usize,
    },

    /// The public key format is invalid
    #[error("Invalid public key format")]
    InvalidPublicKey,

    /// The secret key does not belong to the stored public key
    #[error("Secret key does not match public key")]
    KeyPairMismatch,

    /// A value could not be serialized before encryption
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Text-encoded bytes (hex or base64) could not be decoded
    #[error("Invalid text encoding: {0}")]
    InvalidEncoding(String),

    /// Decryption failed - authentication tag mismatch (wrong key, tampered data or wrong nonce)
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    /// Decrypted bytes are not the JSON document they claim to be
    #[error("Decrypted payload is not valid JSON: {0}")]
    InvalidPlaintext(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
