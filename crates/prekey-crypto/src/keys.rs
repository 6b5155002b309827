use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::kdf::{kdf_into, Usage, FINGERPRINT_LEN};

pub const POINT_LEN: usize = 32;
pub const SCALAR_LEN: usize = 32;
pub const SEED_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Encode a group element in its 32-byte compressed form.
pub fn encode_point(point: &EdwardsPoint) -> [u8; POINT_LEN] {
    point.compress().to_bytes()
}

/// Decode a group element, rejecting anything outside the prime-order subgroup.
///
/// Non-canonical encodings, the identity and points with a small-order
/// component are all refused: the ring signature and the DH would otherwise
/// operate on elements the protocol never produces.
pub fn decode_point(bytes: &[u8]) -> Result<EdwardsPoint, CryptoError> {
    let compressed =
        CompressedEdwardsY::from_slice(bytes).map_err(|_| CryptoError::InvalidPoint)?;
    let point = compressed.decompress().ok_or(CryptoError::InvalidPoint)?;
    if point.is_identity() || !point.is_torsion_free() || point.compress() != compressed {
        return Err(CryptoError::InvalidPoint);
    }
    Ok(point)
}

pub fn encode_scalar(scalar: &Scalar) -> [u8; SCALAR_LEN] {
    scalar.to_bytes()
}

/// Decode a canonical scalar (strictly less than the group order).
pub fn decode_scalar(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let array: [u8; SCALAR_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidScalar)?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(array)).ok_or(CryptoError::InvalidScalar)
}

/// Fingerprint of a long-term public point.
pub fn fingerprint(point: &EdwardsPoint) -> [u8; FINGERPRINT_LEN] {
    let mut out = [0u8; FINGERPRINT_LEN];
    kdf_into(Usage::Fingerprint, &[&encode_point(point)], &mut out);
    out
}

/// A scalar/point pair in the prime-order group.
///
/// Derived from a 32-byte seed with the Ed25519 key expansion, so every
/// fresh keypair consumes exactly [`SEED_LEN`] bytes from the random source.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    secret: Scalar,
    public: EdwardsPoint,
}

impl Keypair {
    pub fn derive(seed: &[u8; SEED_LEN]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            secret: signing_key.to_scalar(),
            public: signing_key.verifying_key().to_edwards(),
        }
    }

    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        rng.fill_bytes(seed.as_mut());
        Self::derive(&seed)
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn public(&self) -> &EdwardsPoint {
        &self.public
    }

    pub fn public_bytes(&self) -> [u8; POINT_LEN] {
        encode_point(&self.public)
    }

    /// Multiply the peer's point by our secret scalar.
    pub fn diffie_hellman(&self, their_public: &EdwardsPoint) -> EdwardsPoint {
        their_public * self.secret
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// A long-term Ed25519 key.
///
/// The expanded secret scalar is also the discrete log of the public point,
/// which lets the same key sign profiles and take part in ring signatures.
#[derive(ZeroizeOnDrop)]
pub struct LongTermKey {
    signing_key: SigningKey,
}

impl LongTermKey {
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        rng.fill_bytes(seed.as_mut());
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_point(&self) -> EdwardsPoint {
        self.signing_key.verifying_key().to_edwards()
    }

    pub fn public_bytes(&self) -> [u8; POINT_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_bytes())
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        fingerprint(&self.public_point())
    }

    /// The scalar/point view of this key, for ring signatures.
    pub fn keypair(&self) -> Keypair {
        Keypair {
            secret: self.signing_key.to_scalar(),
            public: self.public_point(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Verify an Ed25519 signature made by the key encoded in `public_key`.
    pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let key_bytes: [u8; POINT_LEN] = public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("public key must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("invalid Ed25519 public key: {e}")))?;
        let sig_bytes: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::VerificationError("signature must be 64 bytes".into()))?;
        verifying_key
            .verify(message, &Signature::from_bytes(&sig_bytes))
            .map_err(|e| CryptoError::VerificationError(e.to_string()))
    }
}

impl std::fmt::Debug for LongTermKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongTermKey")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}
