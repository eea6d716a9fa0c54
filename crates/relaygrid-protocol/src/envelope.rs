//! Encrypted command envelope.
//!
//! Every message exchanged with a network element travels as
//! `base64(nonce ‖ AES-256-GCM(key, JSON(message)))`. The 96-bit nonce is
//! freshly drawn per encryption and prepended to the ciphertext, so two
//! seals of the same message differ only in the nonce and what follows it.
//!
//! Both directions of every link use the same form; a peer that cannot
//! produce a valid envelope under the shared element key is rejected.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Serialize;

use crate::constants::KEY_LEN;
use crate::error::ProtocolError;

/// GCM nonce length in bytes, prepended to the ciphertext.
const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes, appended by the cipher.
const TAG_LEN: usize = 16;

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, ProtocolError> {
    if key.len() != KEY_LEN {
        return Err(ProtocolError::InvalidKey(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| ProtocolError::InvalidKey(key.len()))
}

/// JSON-serialize `message`, encrypt it under `key`, and return the
/// base64 envelope (strict alphabet, no newlines).
pub fn seal<T: Serialize>(key: &[u8], message: &T) -> Result<String, ProtocolError> {
    let cipher = cipher_for(key)?;
    let plain = serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain.as_ref())
        .map_err(|_| ProtocolError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(B64.encode(blob))
}

/// Decode and decrypt an envelope produced by [`seal`] (ours or a peer's),
/// returning the JSON payload.
///
/// All failure modes collapse into [`ProtocolError::Decrypt`]; callers never
/// need to distinguish a garbled base64 blob from a wrong-key ciphertext.
pub fn open(key: &[u8], blob: &str) -> Result<serde_json::Value, ProtocolError> {
    let cipher = cipher_for(key)?;

    let data = B64
        .decode(blob.trim())
        .map_err(|_| ProtocolError::Decrypt("malformed base64"))?;
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(ProtocolError::Decrypt("envelope too short"));
    }

    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::Decrypt("integrity check failed"))?;

    serde_json::from_slice(&plain).map_err(|_| ProtocolError::Decrypt("payload is not JSON"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_key() -> Vec<u8> {
        (0u8..32).collect()
    }

    #[test]
    fn round_trip() {
        let key = test_key();
        let msg = json!({"command": "STATUS", "params": {"status": "OK"}});
        let blob = seal(&key, &msg).unwrap();
        assert_eq!(open(&key, &blob).unwrap(), msg);
    }

    #[test]
    fn envelope_is_single_line_base64() {
        let key = test_key();
        let blob = seal(&key, &json!({"command": "CHECK"})).unwrap();
        assert!(!blob.contains('\n'));
        assert!(blob.chars().all(|c| c.is_ascii_alphanumeric() || "+/=".contains(c)));
    }

    #[test]
    fn wrong_key_rejected() {
        let blob = seal(&test_key(), &json!({"a": 1})).unwrap();
        let other = [7u8; 32];
        assert!(matches!(
            open(&other, &blob),
            Err(ProtocolError::Decrypt("integrity check failed"))
        ));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let key = test_key();
        let blob = seal(&key, &json!({"a": 1})).unwrap();
        let mut raw = B64.decode(&blob).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = B64.encode(raw);
        assert!(open(&key, &tampered).is_err());
    }

    #[test]
    fn garbage_inputs_rejected() {
        let key = test_key();
        assert!(matches!(
            open(&key, "not base64!!!"),
            Err(ProtocolError::Decrypt("malformed base64"))
        ));
        assert!(matches!(
            open(&key, "AAAA"),
            Err(ProtocolError::Decrypt("envelope too short"))
        ));
    }

    #[test]
    fn short_key_rejected() {
        assert!(matches!(
            seal(&[0u8; 16], &json!({})),
            Err(ProtocolError::InvalidKey(16))
        ));
    }
}
