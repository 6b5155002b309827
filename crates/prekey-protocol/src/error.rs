use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too short to be a valid message")]
    TooShort,

    #[error("invalid protocol version")]
    InvalidVersion,

    #[error("unknown message type: 0x{0:x}")]
    UnknownMessageType(u8),

    #[error("invalid message format - missing ending punctuation")]
    MissingPunctuation,

    #[error("invalid message format - corrupted base64 encoding")]
    CorruptBase64,

    #[error("invalid fragmentation parse")]
    Fragmentation,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("crypto error: {0}")]
    CryptoError(String),
}

impl From<prekey_crypto::CryptoError> for ProtocolError {
    fn from(e: prekey_crypto::CryptoError) -> Self {
        Self::CryptoError(e.to_string())
    }
}
