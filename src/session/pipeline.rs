//! Inbound decode and outbound encode of session frames
//!
//! Inbound frames go through an explicit decision tree:
//!
//! ```text
//! frame ──parse JSON──✗──▶ Unparsable (dropped)
//!   │
//!   ├─ shared key and payload is {nonce, ciphertext} and it opens ──▶ Decrypted(payload)
//!   │
//!   └─ otherwise ──▶ Plaintext(frame)
//! ```
//!
//! A payload that fails to authenticate is not an error: it simply was not
//! ciphertext for us, and the frame is taken as plaintext.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crypto::{BoxCipher, CipherBlob, CryptoError, CryptoResult, PeerPublicKey, SharedBoxKey};

/// Exact text the PC uses to announce its public key
pub const HANDSHAKE_MESSAGE: &str =
    "Here is my the public key for you to privately communicate with me...";

/// Endpoint type of the PC in `from`/`to`
pub const PEER_TYPE: &str = "pc";

/// Field carrying a rotated session token
pub const TOKEN_FIELD: &str = "newTabletToken";

/// Message sent before the client goes away
pub const CLOSE_MESSAGE: &str = "close";

/// Result of decoding one inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// The frame, taken as plaintext JSON
    Plaintext(Value),
    /// The decrypted `payload` of an encrypted frame
    Decrypted(Value),
    /// Not JSON; dropped
    Unparsable,
}

impl Inbound {
    /// The message to surface, if any
    pub fn into_message(self) -> Option<Value> {
        match self {
            Inbound::Plaintext(value) | Inbound::Decrypted(value) => Some(value),
            Inbound::Unparsable => None,
        }
    }

    /// Whether the message arrived encrypted
    pub fn was_encrypted(&self) -> bool {
        matches!(self, Inbound::Decrypted(_))
    }
}

/// Decode one text frame
pub fn decode_inbound(frame: &str, key: Option<&SharedBoxKey>) -> Inbound {
    let parsed: Value = match serde_json::from_str(frame) {
        Ok(value) => value,
        Err(e) => {
            debug!("Dropping unparsable frame ({} bytes): {}", frame.len(), e);
            return Inbound::Unparsable;
        }
    };

    let Some(key) = key else {
        return Inbound::Plaintext(parsed);
    };

    let blob = parsed.get("payload").and_then(CipherBlob::from_value);
    match blob.map(|blob| BoxCipher::decrypt_json::<Value>(key, &blob)) {
        Some(Ok(message)) => Inbound::Decrypted(message),
        Some(Err(e)) => {
            debug!("Payload did not decrypt ({}), treating frame as plaintext", e);
            Inbound::Plaintext(parsed)
        }
        None => Inbound::Plaintext(parsed),
    }
}

/// Outbound message addressee
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Endpoint type, always `"pc"` for the tablet
    #[serde(rename = "type")]
    pub kind: String,
}

/// Encrypted outbound frame: `{"to":{"type":"pc"},"payload":{nonce, ciphertext}}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Addressee
    pub to: Recipient,
    /// Sealed message
    pub payload: CipherBlob,
}

/// Encode an outbound message
///
/// With a shared key the payload is sealed under a fresh nonce and wrapped
/// in an [`EncryptedEnvelope`]; without one it is sent verbatim.
pub fn encode_outbound<T: Serialize + ?Sized>(
    payload: &T,
    key: Option<&SharedBoxKey>,
) -> CryptoResult<String> {
    let text = match key {
        Some(key) => {
            let envelope = EncryptedEnvelope {
                to: Recipient {
                    kind: PEER_TYPE.to_string(),
                },
                payload: BoxCipher::encrypt_json(key, payload, None)?,
            };
            serde_json::to_string(&envelope)
        }
        None => serde_json::to_string(payload),
    };
    text.map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// If `message` is the PC's key announcement, return the announced hex key
///
/// Matches `from.type == "pc"`, `from.id == 0` and the exact
/// [`HANDSHAKE_MESSAGE`] text.
pub fn handshake_key(message: &Value) -> Option<&str> {
    let from = message.get("from")?;
    let payload = message.get("payload")?;

    let from_pc = from.get("type").and_then(Value::as_str) == Some(PEER_TYPE);
    let first_pc = from.get("id").and_then(Value::as_f64) == Some(0.0);
    let announces = payload.get("message").and_then(Value::as_str) == Some(HANDSHAKE_MESSAGE);

    if from_pc && first_pc && announces {
        payload.get("public_key").and_then(Value::as_str)
    } else {
        None
    }
}

/// Parse the announced key of a handshake message
pub fn handshake_peer(message: &Value) -> Option<CryptoResult<PeerPublicKey>> {
    handshake_key(message).map(PeerPublicKey::from_hex)
}

/// The rotated session token carried by `message`, if any
pub fn rotated_token(message: &Value) -> Option<&str> {
    message
        .get(TOKEN_FIELD)
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
}
