//! Transcripts signed during the interactive DAKE.
//!
//! DAKE2 is signed by the server and DAKE3 by the client. Both sign over
//! the ring {client long-term key, server long-term key, server ephemeral
//! key} so that a transcript cannot prove which member produced it.

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::kdf::{kdf, Usage, FINGERPRINT_LEN, MAC_LEN};
use prekey_crypto::keys::encode_point;

use crate::error::ProtocolError;
use crate::profile::ClientProfile;
use crate::wire::Encoder;

const RECEIVER_MARKER: u8 = 0x00;
const INITIATOR_MARKER: u8 = 0x01;

/// Inputs common to both transcripts of one handshake.
#[derive(Debug, Clone, Copy)]
pub struct DakeContext<'a> {
    pub client_profile: &'a ClientProfile,
    pub client_identity: &'a str,
    pub server_identity: &'a str,
    pub server_fingerprint: &'a [u8; FINGERPRINT_LEN],
    /// Client ephemeral point `I`.
    pub client_ephemeral: &'a EdwardsPoint,
    /// Server ephemeral point `S`.
    pub server_ephemeral: &'a EdwardsPoint,
}

impl DakeContext<'_> {
    pub fn composite_identity(&self) -> Result<Vec<u8>, ProtocolError> {
        Encoder::new()
            .data(self.server_identity.as_bytes())
            .raw(self.server_fingerprint)
            .finish()
    }

    pub fn phi(&self) -> Result<Vec<u8>, ProtocolError> {
        Encoder::new()
            .data(self.client_identity.as_bytes())
            .data(self.server_identity.as_bytes())
            .finish()
    }

    fn transcript(
        &self,
        marker: u8,
        profile_usage: Usage,
        composite_usage: Usage,
        phi_usage: Usage,
    ) -> Result<Vec<u8>, ProtocolError> {
        let profile = kdf(profile_usage, MAC_LEN, &[&self.client_profile.to_bytes()?]);
        let composite = kdf(composite_usage, MAC_LEN, &[&self.composite_identity()?]);
        let phi = kdf(phi_usage, MAC_LEN, &[&self.phi()?]);

        let mut t = Vec::with_capacity(1 + 3 * MAC_LEN + 64);
        t.push(marker);
        t.extend_from_slice(&profile);
        t.extend_from_slice(&composite);
        t.extend_from_slice(&encode_point(self.client_ephemeral));
        t.extend_from_slice(&encode_point(self.server_ephemeral));
        t.extend_from_slice(&phi);
        Ok(t)
    }

    /// The message the server ring-signs in DAKE2.
    pub fn dake2_transcript(&self) -> Result<Vec<u8>, ProtocolError> {
        self.transcript(
            RECEIVER_MARKER,
            Usage::ReceiverClientProfile,
            Usage::ReceiverCompositeIdentity,
            Usage::ReceiverCompositePhi,
        )
    }

    /// The message the client ring-signs in DAKE3.
    pub fn dake3_transcript(&self) -> Result<Vec<u8>, ProtocolError> {
        self.transcript(
            INITIATOR_MARKER,
            Usage::InitiatorClientProfile,
            Usage::InitiatorCompositeIdentity,
            Usage::InitiatorCompositePhi,
        )
    }
}
