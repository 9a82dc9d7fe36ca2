//! XSalsa20-Poly1305 box encryption
//!
//! Messages are sealed with a [`SharedBoxKey`] and a random 24-byte nonce. The
//! ciphertext layout is NaCl's (Poly1305 tag first, then the encrypted
//! bytes), so the PC side can open it with any `box.open.after` compatible
//! library.

use crypto_secretbox::{
    aead::{Aead, KeyInit},
    XSalsa20Poly1305,
};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::encoding::{base64_decode, base64_encode, to_array};
use super::error::{CryptoError, CryptoResult};
use super::exchange::SharedBoxKey;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 24;

/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// A box nonce
pub type BoxNonce = [u8; NONCE_SIZE];

/// Draw a fresh nonce from the OS random source
///
/// Every encryption must use a new one; a repeated nonce under the same key
/// breaks the stream cipher.
pub fn new_nonce() -> BoxNonce {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypted payload as it travels on the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherBlob {
    /// Base64 nonce
    pub nonce: String,
    /// Base64 tag-and-ciphertext
    pub ciphertext: String,
}

impl CipherBlob {
    /// Interpret an arbitrary JSON value as a cipher blob
    ///
    /// Returns `None` when the value does not have the `{nonce, ciphertext}` shape.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        CipherBlob::deserialize(value).ok()
    }
}

/// Box cipher operations
pub struct BoxCipher;

impl BoxCipher {
    /// Encrypt raw bytes with an explicit nonce
    ///
    /// Returns: tag || ciphertext
    pub fn seal(key: &SharedBoxKey, nonce: &BoxNonce, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let cipher = XSalsa20Poly1305::new(key.as_bytes().into());
        cipher
            .encrypt(nonce.into(), plaintext)
            .map_err(|_| CryptoError::Encoding("plaintext too large to seal".to_string()))
    }

    /// Decrypt and authenticate raw bytes
    pub fn open(key: &SharedBoxKey, nonce: &BoxNonce, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = XSalsa20Poly1305::new(key.as_bytes().into());
        cipher
            .decrypt(nonce.into(), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Serialize `value` to JSON and seal it
    ///
    /// A fresh nonce is drawn when `nonce` is `None`.
    pub fn encrypt_json<T: Serialize + ?Sized>(
        key: &SharedBoxKey,
        value: &T,
        nonce: Option<BoxNonce>,
    ) -> CryptoResult<CipherBlob> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let nonce = nonce.unwrap_or_else(new_nonce);
        let sealed = Self::seal(key, &nonce, &plaintext)?;

        Ok(CipherBlob {
            nonce: base64_encode(&nonce),
            ciphertext: base64_encode(&sealed),
        })
    }

    /// Open a cipher blob and parse the plaintext as JSON
    pub fn decrypt_json<T: DeserializeOwned>(key: &SharedBoxKey, blob: &CipherBlob) -> CryptoResult<T> {
        let nonce = base64_decode(&blob.nonce)?;
        let nonce: BoxNonce = to_array(&nonce).map_err(|_| CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        })?;
        let sealed = base64_decode(&blob.ciphertext)?;

        let plaintext = Self::open(key, &nonce, &sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| CryptoError::InvalidPlaintext(e.to_string()))
    }
}
