//! Primitive field encodings shared by every protocol structure.
//!
//! All integers are big-endian. `DATA` is a 4-byte length followed by the
//! bytes. Points and scalars use their fixed 32-byte encodings.

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::keys::{decode_point, encode_point, POINT_LEN};
use prekey_crypto::ring_signature::{RingSignature, RING_SIGNATURE_LEN};

use crate::error::ProtocolError;

/// Append-only writer.
///
/// Length overflows are recorded instead of panicking and surface from
/// [`Encoder::finish`].
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    error: Option<String>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn byte(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn short(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn int(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn long(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Raw bytes with no length prefix.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn data(&mut self, bytes: &[u8]) -> &mut Self {
        match u32::try_from(bytes.len()) {
            Ok(len) => {
                self.int(len);
                self.raw(bytes)
            }
            Err(_) => self.fail(format!("DATA field of {} bytes too long", bytes.len())),
        }
    }

    /// A one-byte element count.
    pub fn count(&mut self, count: usize) -> &mut Self {
        match u8::try_from(count) {
            Ok(n) => self.byte(n),
            Err(_) => self.fail(format!("{count} elements do not fit in a count byte")),
        }
    }

    pub fn point(&mut self, point: &EdwardsPoint) -> &mut Self {
        self.raw(&encode_point(point))
    }

    pub fn ring_signature(&mut self, sigma: &RingSignature) -> &mut Self {
        self.raw(&sigma.to_bytes())
    }

    fn fail(&mut self, reason: String) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(reason);
        }
        self
    }

    pub fn finish(&mut self) -> Result<Vec<u8>, ProtocolError> {
        match self.error.take() {
            Some(reason) => Err(ProtocolError::Serialization(reason)),
            None => Ok(std::mem::take(&mut self.buf)),
        }
    }
}

/// Cursor over a received buffer. Never panics on short input.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Deserialization(format!(
                "needed {len} bytes at offset {}, had {}",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn byte(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.array::<1>()?[0])
    }

    pub fn short(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn int(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn long(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn data(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = usize::try_from(self.int()?)
            .map_err(|_| ProtocolError::Deserialization("DATA length overflow".into()))?;
        self.take(len)
    }

    pub fn point(&mut self) -> Result<EdwardsPoint, ProtocolError> {
        Ok(decode_point(self.take(POINT_LEN)?)?)
    }

    pub fn ring_signature(&mut self) -> Result<RingSignature, ProtocolError> {
        let (sigma, _) = RingSignature::from_bytes(self.take(RING_SIGNATURE_LEN)?)?;
        Ok(sigma)
    }

    /// Fail if anything is left after the last field.
    pub fn finish(&self) -> Result<(), ProtocolError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(ProtocolError::Deserialization(format!(
                "{} trailing bytes",
                self.remaining()
            )))
        }
    }
}
