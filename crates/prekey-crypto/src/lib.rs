pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;
pub mod ring_signature;

pub use error::CryptoError;
pub use kdf::Usage;
pub use keys::{Keypair, LongTermKey};
pub use random::RandomSource;
#[cfg(any(test, feature = "test-util"))]
pub use random::FixedRandom;
pub use ring_signature::RingSignature;
