//! Text encodings for key material and ciphertext
//!
//! Public keys travel as lowercase hex (relay URLs, QR codes, the handshake
//! announcement). Nonces, ciphertexts and stored keys use standard base64.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::error::{CryptoError, CryptoResult};

/// Encode bytes as lowercase hex, two characters per byte
pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex string produced by [`hex_encode`]
///
/// Upper-case digits are accepted; odd lengths and non-hex characters are not.
pub fn hex_decode(s: &str) -> CryptoResult<Vec<u8>> {
    hex::decode(s).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Encode bytes as standard (padded) base64
pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard base64
pub fn base64_decode(s: &str) -> CryptoResult<Vec<u8>> {
    BASE64
        .decode(s.trim())
        .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
}

/// Copy a decoded slice into a fixed-size array, checking the length
pub(crate) fn to_array<const N: usize>(bytes: &[u8]) -> CryptoResult<[u8; N]> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: N,
        actual: bytes.len(),
    })
}
