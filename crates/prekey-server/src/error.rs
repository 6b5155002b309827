use prekey_crypto::CryptoError;
use prekey_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("empty message")]
    EmptyMessage,

    #[error("incorrect MAC")]
    IncorrectMac,

    #[error("invalid mac for publication message")]
    PublicationMac,

    #[error("invalid client profile in publication message")]
    PublicationClientProfile,

    #[error("invalid prekey profile in publication message")]
    PublicationPrekeyProfile,

    #[error("invalid prekey message in publication message")]
    PublicationPrekeyMessage,

    #[error("invalid client profile: {0}")]
    InvalidClientProfile(String),

    #[error("instance tag 0x{received:08x} does not match session tag 0x{expected:08x}")]
    InstanceTagMismatch { expected: u32, received: u32 },

    #[error("instance tag must not be zero")]
    ZeroInstanceTag,

    #[error("invalid ring signature")]
    InvalidRingSignature,

    #[error("no session awaiting DAKE3")]
    NotAwaitingDake3,

    #[error("no authenticated session")]
    NotAuthenticated,

    #[error("unexpected message type: 0x{0:x}")]
    UnexpectedMessage(u8),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by a custom [`crate::handler::MessageHandler`].
    #[error("{0}")]
    Handler(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
