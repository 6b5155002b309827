//! SHAKE-256 key derivation with usage-domain separation.
//!
//! Every derivation is `SHAKE-256("OTRv4" || usage || values...)`, so two
//! derivations over the same input but different usages never collide.

use curve25519_dalek::scalar::Scalar;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use subtle::ConstantTimeEq;

const DOMAIN: &[u8] = b"OTRv4";

/// Length of every MAC produced by the prekey server protocol.
pub const MAC_LEN: usize = 64;
/// Length of the DAKE shared secret `SK`.
pub const SHARED_SECRET_LEN: usize = 64;
/// Length of a long-term key fingerprint.
pub const FINGERPRINT_LEN: usize = 56;

/// Usage tags mixed into every derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Usage {
    Fingerprint = 0x00,
    SharedSecret = 0x01,
    InitiatorClientProfile = 0x02,
    InitiatorCompositeIdentity = 0x03,
    InitiatorCompositePhi = 0x04,
    ReceiverClientProfile = 0x05,
    ReceiverCompositeIdentity = 0x06,
    ReceiverCompositePhi = 0x07,
    PreMacKey = 0x08,
    PreMac = 0x09,
    StorageInfoMac = 0x0A,
    StatusMac = 0x0B,
    SuccessMac = 0x0C,
    FailureMac = 0x0D,
    PrekeyMessage = 0x0E,
    ClientProfile = 0x0F,
    PrekeyProfile = 0x10,
    RingChallenge = 0x1D,
}

/// Derive `len` bytes from the concatenation of `values` under `usage`.
pub fn kdf(usage: Usage, len: usize, values: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![0u8; len];
    kdf_into(usage, values, &mut out);
    out
}

/// Like [`kdf`] but writes into a caller-provided buffer.
pub fn kdf_into(usage: Usage, values: &[&[u8]], out: &mut [u8]) {
    let mut hasher = Shake256::default();
    hasher.update(DOMAIN);
    hasher.update(&[usage as u8]);
    for value in values {
        hasher.update(value);
    }
    hasher.finalize_xof().read(out);
}

/// Hash `values` to a scalar by reducing a 64-byte derivation mod q.
pub fn hash_to_scalar(usage: Usage, values: &[&[u8]]) -> Scalar {
    let mut wide = [0u8; 64];
    kdf_into(usage, values, &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Compare two MACs without leaking the position of the first difference.
pub fn mac_eq(expected: &[u8], received: &[u8]) -> bool {
    expected.ct_eq(received).into()
}
