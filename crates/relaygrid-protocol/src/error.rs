use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid key length: {0} bytes (expected 32)")]
    InvalidKey(usize),

    #[error("JSON encode error: {0}")]
    Encode(String),

    #[error("encryption failure")]
    Encrypt,

    /// Single surface for everything that can go wrong opening an inbound
    /// envelope: malformed base64, truncated blob, failed AEAD integrity
    /// check, or unparseable JSON plaintext.
    #[error("decrypt error: {0}")]
    Decrypt(&'static str),

    #[error("malformed {command} command: {reason}")]
    MalformedCommand { command: String, reason: String },
}
