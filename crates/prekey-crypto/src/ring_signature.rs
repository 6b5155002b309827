//! Non-interactive 1-of-3 proof of knowledge of a discrete log.
//!
//! The signer proves it knows the secret behind one of `A1, A2, A3` without
//! revealing which. Every choice between the real and the simulated branch
//! goes through `subtle` selection so control flow and timing are the same
//! whichever position holds the real key.

use curve25519_dalek::constants::ED25519_BASEPOINT_COMPRESSED;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

use crate::error::CryptoError;
use crate::kdf::{hash_to_scalar, Usage};
use crate::keys::{decode_point, decode_scalar, encode_point, encode_scalar, Keypair, SCALAR_LEN};

/// Serialized size: six scalars.
pub const RING_SIGNATURE_LEN: usize = 6 * SCALAR_LEN;

/// Little-endian encoding of the prime group order q.
const GROUP_ORDER_BYTES: [u8; 32] = [
    0xed, 0xd3, 0xf5, 0x5c, 0x1a, 0x63, 0x12, 0x58, 0xd6, 0x9c, 0xf7, 0xa2, 0xde, 0xf9, 0xde, 0x14,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSignature {
    pub c1: Scalar,
    pub r1: Scalar,
    pub c2: Scalar,
    pub r2: Scalar,
    pub c3: Scalar,
    pub r3: Scalar,
}

/// Global challenge over the ring, the three commitments and the message.
fn challenge(ring: [&EdwardsPoint; 3], commitments: [&EdwardsPoint; 3], message: &[u8]) -> Scalar {
    let [a1, a2, a3] = ring.map(encode_point);
    let [t1, t2, t3] = commitments.map(encode_point);
    hash_to_scalar(
        Usage::RingChallenge,
        &[
            ED25519_BASEPOINT_COMPRESSED.as_bytes(),
            &GROUP_ORDER_BYTES,
            &a1,
            &a2,
            &a3,
            &t1,
            &t2,
            &t3,
            message,
        ],
    )
}

/// `T_i` when `is_secret`, else the simulated commitment `A_i·c_i + R_i`.
fn choose_commitment(
    a: &EdwardsPoint,
    is_secret: Choice,
    r_point: &EdwardsPoint,
    t_point: &EdwardsPoint,
    c: &Scalar,
) -> EdwardsPoint {
    let simulated = a * c + r_point;
    EdwardsPoint::conditional_select(&simulated, t_point, is_secret)
}

/// `c - c_j - c_k` when `is_secret`, else the pre-sampled `c_i`.
fn choose_challenge(
    c: &Scalar,
    c_i: &Scalar,
    is_secret: Choice,
    c_j: &Scalar,
    c_k: &Scalar,
) -> Scalar {
    let if_secret = c - c_j - c_k;
    Scalar::conditional_select(c_i, &if_secret, is_secret)
}

/// `t_i - c_i·secret` when `is_secret`, else the pre-sampled `r_i`.
fn choose_response(
    secret: &Scalar,
    r_i: &Scalar,
    is_secret: Choice,
    c_i: &Scalar,
    t_i: &Scalar,
) -> Scalar {
    let if_secret = t_i - c_i * secret;
    Scalar::conditional_select(r_i, &if_secret, is_secret)
}

impl RingSignature {
    /// Sign `message` as one of `{a1, a2, a3}`.
    ///
    /// `signer` must own one of the three points. Randomness is drawn in a
    /// fixed order (t1..t3, r1..r3, c1..c3), one 32-byte seed each, so a
    /// fixed source gives a reproducible signature.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(
        rng: &mut R,
        signer: &Keypair,
        a1: &EdwardsPoint,
        a2: &EdwardsPoint,
        a3: &EdwardsPoint,
        message: &[u8],
    ) -> Result<Self, CryptoError> {
        let public = signer.public();
        let is_a1 = public.ct_eq(a1);
        let is_a2 = public.ct_eq(a2);
        let is_a3 = public.ct_eq(a3);

        if !bool::from(is_a1 | is_a2 | is_a3) {
            return Err(CryptoError::SigningError(
                "signer key is not a member of the ring".into(),
            ));
        }

        let t1 = Keypair::generate(rng);
        let t2 = Keypair::generate(rng);
        let t3 = Keypair::generate(rng);

        let r1 = Keypair::generate(rng);
        let r2 = Keypair::generate(rng);
        let r3 = Keypair::generate(rng);

        let c1 = *Keypair::generate(rng).secret();
        let c2 = *Keypair::generate(rng).secret();
        let c3 = *Keypair::generate(rng).secret();

        let chosen_t1 = choose_commitment(a1, is_a1, r1.public(), t1.public(), &c1);
        let chosen_t2 = choose_commitment(a2, is_a2, r2.public(), t2.public(), &c2);
        let chosen_t3 = choose_commitment(a3, is_a3, r3.public(), t3.public(), &c3);

        let c = challenge([a1, a2, a3], [&chosen_t1, &chosen_t2, &chosen_t3], message);

        let final_c1 = choose_challenge(&c, &c1, is_a1, &c2, &c3);
        let final_c2 = choose_challenge(&c, &c2, is_a2, &c1, &c3);
        let final_c3 = choose_challenge(&c, &c3, is_a3, &c1, &c2);

        let secret = signer.secret();
        Ok(Self {
            c1: final_c1,
            r1: choose_response(secret, r1.secret(), is_a1, &final_c1, t1.secret()),
            c2: final_c2,
            r2: choose_response(secret, r2.secret(), is_a2, &final_c2, t2.secret()),
            c3: final_c3,
            r3: choose_response(secret, r3.secret(), is_a3, &final_c3, t3.secret()),
        })
    }

    /// Check the signature against the ring `{a1, a2, a3}` and `message`.
    ///
    /// Rebuilds each commitment as `A_i·c_i + G·r_i`, recomputes the global
    /// challenge and accepts iff it equals `c1 + c2 + c3`.
    pub fn verify(
        &self,
        a1: &EdwardsPoint,
        a2: &EdwardsPoint,
        a3: &EdwardsPoint,
        message: &[u8],
    ) -> Result<(), CryptoError> {
        for member in [a1, a2, a3] {
            decode_point(&encode_point(member))?;
        }

        let t1 = a1 * self.c1 + EdwardsPoint::mul_base(&self.r1);
        let t2 = a2 * self.c2 + EdwardsPoint::mul_base(&self.r2);
        let t3 = a3 * self.c3 + EdwardsPoint::mul_base(&self.r3);

        let c = challenge([a1, a2, a3], [&t1, &t2, &t3], message);
        let sum = self.c1 + self.c2 + self.c3;

        if bool::from(c.ct_eq(&sum)) {
            Ok(())
        } else {
            tracing::debug!("ring signature challenge mismatch");
            Err(CryptoError::VerificationError(
                "ring signature does not verify".into(),
            ))
        }
    }

    /// `c1 || r1 || c2 || r2 || c3 || r3`.
    pub fn to_bytes(&self) -> [u8; RING_SIGNATURE_LEN] {
        let mut out = [0u8; RING_SIGNATURE_LEN];
        for (chunk, scalar) in out
            .chunks_exact_mut(SCALAR_LEN)
            .zip([&self.c1, &self.r1, &self.c2, &self.r2, &self.c3, &self.r3])
        {
            chunk.copy_from_slice(&encode_scalar(scalar));
        }
        out
    }

    /// Parse a signature from the front of `buf`, returning the remainder.
    pub fn from_bytes(buf: &[u8]) -> Result<(Self, &[u8]), CryptoError> {
        if buf.len() < RING_SIGNATURE_LEN {
            return Err(CryptoError::Truncated {
                needed: RING_SIGNATURE_LEN,
                available: buf.len(),
            });
        }
        let (sig, rest) = buf.split_at(RING_SIGNATURE_LEN);
        let mut scalars = sig.chunks_exact(SCALAR_LEN).map(decode_scalar);
        let mut next = || scalars.next().unwrap_or(Err(CryptoError::InvalidScalar));
        let signature = Self {
            c1: next()?,
            r1: next()?,
            c2: next()?,
            r2: next()?,
            c3: next()?,
            r3: next()?,
        };
        Ok((signature, rest))
    }
}
