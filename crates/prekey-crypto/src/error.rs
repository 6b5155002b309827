use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    SigningError(String),

    #[error("verification failed: {0}")]
    VerificationError(String),

    #[error("buffer too short: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },
}
