//! Randomness as an injected capability.
//!
//! Nothing in the prekey server draws from a global generator. Every
//! operation that needs entropy takes a [`RandomSource`], which lets tests
//! replay a fixed byte sequence and get byte-identical output.

use rand::{CryptoRng, RngCore};

/// Object-safe bundle of `RngCore + CryptoRng`.
pub trait RandomSource: RngCore + CryptoRng {}

impl<T: RngCore + CryptoRng> RandomSource for T {}

/// A source that replays `bytes` cyclically.
///
/// Only compiled for tests and the `test-util` feature. It is marked
/// `CryptoRng` so it can stand in where the real generator goes.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone)]
pub struct FixedRandom {
    bytes: Vec<u8>,
    position: usize,
}

#[cfg(any(test, feature = "test-util"))]
impl FixedRandom {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            position: 0,
        }
    }

    /// Build a source from several chunks consumed in order.
    pub fn from_chunks(chunks: &[&[u8]]) -> Self {
        Self::new(chunks.concat())
    }
}

#[cfg(any(test, feature = "test-util"))]
impl RngCore for FixedRandom {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if self.bytes.is_empty() {
            dest.fill(0);
            return;
        }
        for byte in dest.iter_mut() {
            *byte = self.bytes[self.position % self.bytes.len()];
            self.position = self.position.wrapping_add(1);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(any(test, feature = "test-util"))]
impl CryptoRng for FixedRandom {}
