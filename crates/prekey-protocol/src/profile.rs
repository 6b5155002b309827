//! Client profiles, prekey profiles, prekey messages and the ensembles
//! handed out on retrieval.

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::keys::{encode_point, LongTermKey, SIGNATURE_LEN};

use crate::error::ProtocolError;
use crate::message::PROTOCOL_VERSION;
use crate::wire::{Decoder, Encoder};

fn check_instance_tag(expected: u32, actual: u32) -> Result<(), ProtocolError> {
    if actual == 0 {
        return Err(ProtocolError::InvalidProfile("instance tag is zero".into()));
    }
    if actual != expected {
        return Err(ProtocolError::InvalidProfile(format!(
            "instance tag 0x{actual:08x} does not match 0x{expected:08x}"
        )));
    }
    Ok(())
}

fn check_signature(
    owner: &EdwardsPoint,
    body: &[u8],
    signature: &[u8],
) -> Result<(), ProtocolError> {
    LongTermKey::verify(&encode_point(owner), body, signature)
        .map_err(|e| ProtocolError::InvalidProfile(format!("bad signature: {e}")))
}

/// Long-term identity assertion of a client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    pub identifier: u32,
    pub instance_tag: u32,
    pub public_key: EdwardsPoint,
    pub versions: Vec<u8>,
    /// Unix seconds after which the profile is no longer valid.
    pub expiration: u64,
    pub legacy_key: Option<Vec<u8>>,
    pub transitional_signature: Option<Vec<u8>>,
    pub signature: [u8; SIGNATURE_LEN],
}

impl ClientProfile {
    /// Build and sign a profile for `key`.
    pub fn sign(
        key: &LongTermKey,
        identifier: u32,
        instance_tag: u32,
        versions: Vec<u8>,
        expiration: u64,
    ) -> Result<Self, ProtocolError> {
        let mut profile = Self {
            identifier,
            instance_tag,
            public_key: key.public_point(),
            versions,
            expiration,
            legacy_key: None,
            transitional_signature: None,
            signature: [0u8; SIGNATURE_LEN],
        };
        profile.signature = key.sign(&profile.body()?);
        Ok(profile)
    }

    fn encode_body(&self, enc: &mut Encoder) {
        enc.int(self.identifier)
            .int(self.instance_tag)
            .point(&self.public_key)
            .data(&self.versions)
            .long(self.expiration)
            .data(self.legacy_key.as_deref().unwrap_or_default())
            .data(self.transitional_signature.as_deref().unwrap_or_default());
    }

    /// The signed portion of the profile.
    pub fn body(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut enc = Encoder::new();
        self.encode_body(&mut enc);
        enc.finish()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        self.encode_body(enc);
        enc.raw(&self.signature);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.finish()
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let optional = |bytes: &[u8]| (!bytes.is_empty()).then(|| bytes.to_vec());
        Ok(Self {
            identifier: dec.int()?,
            instance_tag: dec.int()?,
            public_key: dec.point()?,
            versions: dec.data()?.to_vec(),
            expiration: dec.long()?,
            legacy_key: optional(dec.data()?),
            transitional_signature: optional(dec.data()?),
            signature: dec.array()?,
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    /// Valid iff the tag matches, version 4 is supported, the profile has
    /// not expired and the signature verifies under its own key.
    pub fn validate(&self, instance_tag: u32, now: u64) -> Result<(), ProtocolError> {
        check_instance_tag(instance_tag, self.instance_tag)?;
        if !self.versions.iter().any(|v| u16::from(*v) == PROTOCOL_VERSION) {
            return Err(ProtocolError::InvalidProfile(
                "version 4 not supported by profile".into(),
            ));
        }
        if self.is_expired(now) {
            return Err(ProtocolError::InvalidProfile("client profile expired".into()));
        }
        check_signature(&self.public_key, &self.body()?, &self.signature)
    }
}

/// Signed shared prekey bound to a client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyProfile {
    pub identifier: u32,
    pub instance_tag: u32,
    pub expiration: u64,
    pub shared_prekey: EdwardsPoint,
    pub signature: [u8; SIGNATURE_LEN],
}

impl PrekeyProfile {
    pub fn sign(
        key: &LongTermKey,
        identifier: u32,
        instance_tag: u32,
        expiration: u64,
        shared_prekey: EdwardsPoint,
    ) -> Result<Self, ProtocolError> {
        let mut profile = Self {
            identifier,
            instance_tag,
            expiration,
            shared_prekey,
            signature: [0u8; SIGNATURE_LEN],
        };
        profile.signature = key.sign(&profile.body()?);
        Ok(profile)
    }

    pub fn body(&self) -> Result<Vec<u8>, ProtocolError> {
        Encoder::new()
            .int(self.identifier)
            .int(self.instance_tag)
            .long(self.expiration)
            .point(&self.shared_prekey)
            .finish()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.int(self.identifier)
            .int(self.instance_tag)
            .long(self.expiration)
            .point(&self.shared_prekey)
            .raw(&self.signature);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.finish()
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            identifier: dec.int()?,
            instance_tag: dec.int()?,
            expiration: dec.long()?,
            shared_prekey: dec.point()?,
            signature: dec.array()?,
        })
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    pub fn validate(
        &self,
        instance_tag: u32,
        owner: &EdwardsPoint,
        now: u64,
    ) -> Result<(), ProtocolError> {
        check_instance_tag(instance_tag, self.instance_tag)?;
        if self.is_expired(now) {
            return Err(ProtocolError::InvalidProfile("prekey profile expired".into()));
        }
        check_signature(owner, &self.body()?, &self.signature)
    }
}

/// One-time ephemeral key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyMessage {
    pub identifier: u32,
    pub instance_tag: u32,
    pub y: EdwardsPoint,
    pub b: Vec<u8>,
    pub signature: [u8; SIGNATURE_LEN],
}

impl PrekeyMessage {
    pub fn sign(
        key: &LongTermKey,
        identifier: u32,
        instance_tag: u32,
        y: EdwardsPoint,
        b: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        let mut message = Self {
            identifier,
            instance_tag,
            y,
            b,
            signature: [0u8; SIGNATURE_LEN],
        };
        message.signature = key.sign(&message.body()?);
        Ok(message)
    }

    pub fn body(&self) -> Result<Vec<u8>, ProtocolError> {
        Encoder::new()
            .int(self.identifier)
            .int(self.instance_tag)
            .point(&self.y)
            .data(&self.b)
            .finish()
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.int(self.identifier)
            .int(self.instance_tag)
            .point(&self.y)
            .data(&self.b)
            .raw(&self.signature);
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        enc.finish()
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            identifier: dec.int()?,
            instance_tag: dec.int()?,
            y: dec.point()?,
            b: dec.data()?.to_vec(),
            signature: dec.array()?,
        })
    }

    pub fn validate(&self, instance_tag: u32, owner: &EdwardsPoint) -> Result<(), ProtocolError> {
        check_instance_tag(instance_tag, self.instance_tag)?;
        check_signature(owner, &self.body()?, &self.signature)
    }
}

/// Everything a peer needs to start an offline conversation with one
/// client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrekeyEnsemble {
    pub client_profile: ClientProfile,
    pub prekey_profile: PrekeyProfile,
    pub prekey_message: PrekeyMessage,
}

impl PrekeyEnsemble {
    pub fn encode(&self, enc: &mut Encoder) {
        self.client_profile.encode(enc);
        self.prekey_profile.encode(enc);
        self.prekey_message.encode(enc);
    }

    pub fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_profile: ClientProfile::decode(dec)?,
            prekey_profile: PrekeyProfile::decode(dec)?,
            prekey_message: PrekeyMessage::decode(dec)?,
        })
    }
}
