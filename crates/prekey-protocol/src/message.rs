//! Typed protocol messages and their binary encoding.
//!
//! Every message starts with `SHORT version || BYTE type`.

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::kdf::{mac_eq, FINGERPRINT_LEN};
use prekey_crypto::ring_signature::RingSignature;

use crate::error::ProtocolError;
use crate::mac::{self, Mac, MacKey};
use crate::profile::{ClientProfile, PrekeyEnsemble, PrekeyMessage, PrekeyProfile};
use crate::wire::{Decoder, Encoder};

pub const PROTOCOL_VERSION: u16 = 4;

pub const MSG_FAILURE: u8 = 0x05;
pub const MSG_SUCCESS: u8 = 0x06;
pub const MSG_PUBLICATION: u8 = 0x08;
pub const MSG_STORAGE_INFO_REQUEST: u8 = 0x09;
pub const MSG_STORAGE_STATUS: u8 = 0x0B;
pub const MSG_NO_PREKEY_ENSEMBLES: u8 = 0x0E;
pub const MSG_ENSEMBLE_RETRIEVAL_QUERY: u8 = 0x10;
pub const MSG_ENSEMBLE_RETRIEVAL: u8 = 0x13;
pub const MSG_DAKE1: u8 = 0x35;
pub const MSG_DAKE2: u8 = 0x36;
pub const MSG_DAKE3: u8 = 0x37;

const HEADER_LEN: usize = 3;

/// Split off `SHORT version || BYTE type`, rejecting short input and
/// foreign versions.
fn read_header(bytes: &[u8]) -> Result<(Decoder<'_>, u8), ProtocolError> {
    if bytes.len() < HEADER_LEN {
        return Err(ProtocolError::TooShort);
    }
    let mut dec = Decoder::new(bytes);
    if dec.short()? != PROTOCOL_VERSION {
        return Err(ProtocolError::InvalidVersion);
    }
    let message_type = dec.byte()?;
    Ok((dec, message_type))
}

fn utf8(bytes: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProtocolError::Deserialization("identity is not valid UTF-8".into()))
}

/// Client opens the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake1 {
    pub instance_tag: u32,
    pub client_profile: ClientProfile,
    /// Client ephemeral point `I`.
    pub i: EdwardsPoint,
}

impl Dake1 {
    fn encode_body(&self, enc: &mut Encoder) {
        enc.int(self.instance_tag);
        self.client_profile.encode(enc);
        enc.point(&self.i);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            instance_tag: dec.int()?,
            client_profile: ClientProfile::decode(dec)?,
            i: dec.point()?,
        })
    }
}

/// Server reply to DAKE1, authenticated only by the ring signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake2 {
    pub instance_tag: u32,
    pub server_identity: String,
    pub server_fingerprint: [u8; FINGERPRINT_LEN],
    /// Server ephemeral point `S`.
    pub s: EdwardsPoint,
    pub sigma: RingSignature,
}

impl Dake2 {
    fn encode_body(&self, enc: &mut Encoder) {
        enc.int(self.instance_tag)
            .data(self.server_identity.as_bytes())
            .raw(&self.server_fingerprint)
            .point(&self.s)
            .ring_signature(&self.sigma);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            instance_tag: dec.int()?,
            server_identity: utf8(dec.data()?)?,
            server_fingerprint: dec.array()?,
            s: dec.point()?,
            sigma: dec.ring_signature()?,
        })
    }
}

/// The storage operation bundled into DAKE3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dake3Payload {
    StorageInformation(StorageInformationRequest),
    Publication(Publication),
}

impl Dake3Payload {
    fn into_message(self) -> Message {
        match self {
            Self::StorageInformation(m) => Message::StorageInformationRequest(m),
            Self::Publication(m) => Message::Publication(m),
        }
    }

    /// Decode the inner message by its type byte. Only the two storage
    /// operations are read; anything else is refused before its body.
    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (mut dec, message_type) = read_header(bytes)?;
        let payload = match message_type {
            MSG_STORAGE_INFO_REQUEST => Self::StorageInformation(StorageInformationRequest {
                mac: dec.array()?,
            }),
            MSG_PUBLICATION => Self::Publication(Publication::decode_body(&mut dec)?),
            other => {
                return Err(ProtocolError::Deserialization(format!(
                    "DAKE3 cannot carry message type 0x{other:x}"
                )))
            }
        };
        dec.finish()?;
        Ok(payload)
    }
}

/// Client closes the handshake and proves possession of its long-term key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dake3 {
    pub instance_tag: u32,
    pub sigma: RingSignature,
    pub payload: Dake3Payload,
}

impl Dake3 {
    fn encode_body(&self, enc: &mut Encoder) -> Result<(), ProtocolError> {
        let inner = self.payload.clone().into_message().encode()?;
        enc.int(self.instance_tag)
            .ring_signature(&self.sigma)
            .data(&inner);
        Ok(())
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let instance_tag = dec.int()?;
        let sigma = dec.ring_signature()?;
        let payload = Dake3Payload::decode(dec.data()?)?;
        Ok(Self {
            instance_tag,
            sigma,
            payload,
        })
    }
}

/// Prekey material a client uploads after authenticating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub prekey_messages: Vec<PrekeyMessage>,
    pub client_profile: Option<ClientProfile>,
    pub prekey_profile: Option<PrekeyProfile>,
    pub mac: Mac,
}

impl Publication {
    pub fn new(
        mac_key: &MacKey,
        prekey_messages: Vec<PrekeyMessage>,
        client_profile: Option<ClientProfile>,
        prekey_profile: Option<PrekeyProfile>,
    ) -> Result<Self, ProtocolError> {
        let mac = mac::publication_mac(
            mac_key,
            &prekey_messages,
            client_profile.as_ref(),
            prekey_profile.as_ref(),
        )?;
        Ok(Self {
            prekey_messages,
            client_profile,
            prekey_profile,
            mac,
        })
    }

    pub fn verify_mac(&self, mac_key: &MacKey) -> Result<bool, ProtocolError> {
        let expected = mac::publication_mac(
            mac_key,
            &self.prekey_messages,
            self.client_profile.as_ref(),
            self.prekey_profile.as_ref(),
        )?;
        Ok(mac_eq(&expected, &self.mac))
    }

    fn encode_body(&self, enc: &mut Encoder) {
        enc.count(self.prekey_messages.len());
        for message in &self.prekey_messages {
            message.encode(enc);
        }
        enc.count(usize::from(self.client_profile.is_some()));
        if let Some(profile) = &self.client_profile {
            profile.encode(enc);
        }
        enc.count(usize::from(self.prekey_profile.is_some()));
        if let Some(profile) = &self.prekey_profile {
            profile.encode(enc);
        }
        enc.raw(&self.mac);
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self, ProtocolError> {
        let n = dec.byte()?;
        let prekey_messages = (0..n)
            .map(|_| PrekeyMessage::decode(dec))
            .collect::<Result<Vec<_>, _>>()?;
        let client_profile = match dec.byte()? {
            0 => None,
            1 => Some(ClientProfile::decode(dec)?),
            k => {
                return Err(ProtocolError::Deserialization(format!(
                    "publication carries {k} client profiles"
                )))
            }
        };
        let prekey_profile = match dec.byte()? {
            0 => None,
            1 => Some(PrekeyProfile::decode(dec)?),
            j => {
                return Err(ProtocolError::Deserialization(format!(
                    "publication carries {j} prekey profiles"
                )))
            }
        };
        Ok(Self {
            prekey_messages,
            client_profile,
            prekey_profile,
            mac: dec.array()?,
        })
    }
}

/// Asks how many prekey messages the server holds for the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInformationRequest {
    pub mac: Mac,
}

impl StorageInformationRequest {
    pub fn new(mac_key: &MacKey) -> Self {
        Self {
            mac: mac::storage_info_mac(mac_key),
        }
    }

    pub fn verify_mac(&self, mac_key: &MacKey) -> bool {
        mac_eq(&mac::storage_info_mac(mac_key), &self.mac)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStatus {
    pub instance_tag: u32,
    pub number: u32,
    pub mac: Mac,
}

impl StorageStatus {
    pub fn new(mac_key: &MacKey, instance_tag: u32, number: u32) -> Self {
        Self {
            instance_tag,
            number,
            mac: mac::storage_status_mac(mac_key, instance_tag, number),
        }
    }

    pub fn verify_mac(&self, mac_key: &MacKey) -> bool {
        mac_eq(
            &mac::storage_status_mac(mac_key, self.instance_tag, self.number),
            &self.mac,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Success {
    pub instance_tag: u32,
    pub mac: Mac,
}

impl Success {
    pub fn new(mac_key: &MacKey, instance_tag: u32) -> Self {
        Self {
            instance_tag,
            mac: mac::success_mac(mac_key, instance_tag),
        }
    }

    pub fn verify_mac(&self, mac_key: &MacKey) -> bool {
        mac_eq(&mac::success_mac(mac_key, self.instance_tag), &self.mac)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub instance_tag: u32,
    pub mac: Mac,
}

impl Failure {
    pub fn new(mac_key: &MacKey, instance_tag: u32) -> Self {
        Self {
            instance_tag,
            mac: mac::failure_mac(mac_key, instance_tag),
        }
    }

    pub fn verify_mac(&self, mac_key: &MacKey) -> bool {
        mac_eq(&mac::failure_mac(mac_key, self.instance_tag), &self.mac)
    }
}

/// Asks for ensembles of another identity. Needs no session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleRetrievalQuery {
    pub instance_tag: u32,
    pub identity: String,
    pub versions: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsembleRetrieval {
    pub instance_tag: u32,
    pub ensembles: Vec<PrekeyEnsemble>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoPrekeyEnsembles {
    pub instance_tag: u32,
    pub message: String,
}

impl NoPrekeyEnsembles {
    pub const DEFAULT_TEXT: &'static str = "No Prekey Messages available for this identity";

    pub fn new(instance_tag: u32) -> Self {
        Self {
            instance_tag,
            message: Self::DEFAULT_TEXT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Dake1(Dake1),
    Dake2(Dake2),
    Dake3(Dake3),
    Publication(Publication),
    StorageInformationRequest(StorageInformationRequest),
    StorageStatus(StorageStatus),
    Success(Success),
    Failure(Failure),
    EnsembleRetrievalQuery(EnsembleRetrievalQuery),
    EnsembleRetrieval(EnsembleRetrieval),
    NoPrekeyEnsembles(NoPrekeyEnsembles),
}

impl Message {
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Dake1(_) => MSG_DAKE1,
            Self::Dake2(_) => MSG_DAKE2,
            Self::Dake3(_) => MSG_DAKE3,
            Self::Publication(_) => MSG_PUBLICATION,
            Self::StorageInformationRequest(_) => MSG_STORAGE_INFO_REQUEST,
            Self::StorageStatus(_) => MSG_STORAGE_STATUS,
            Self::Success(_) => MSG_SUCCESS,
            Self::Failure(_) => MSG_FAILURE,
            Self::EnsembleRetrievalQuery(_) => MSG_ENSEMBLE_RETRIEVAL_QUERY,
            Self::EnsembleRetrieval(_) => MSG_ENSEMBLE_RETRIEVAL,
            Self::NoPrekeyEnsembles(_) => MSG_NO_PREKEY_ENSEMBLES,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut enc = Encoder::new();
        enc.short(PROTOCOL_VERSION).byte(self.message_type());
        match self {
            Self::Dake1(m) => m.encode_body(&mut enc),
            Self::Dake2(m) => m.encode_body(&mut enc),
            Self::Dake3(m) => m.encode_body(&mut enc)?,
            Self::Publication(m) => m.encode_body(&mut enc),
            Self::StorageInformationRequest(m) => {
                enc.raw(&m.mac);
            }
            Self::StorageStatus(m) => {
                enc.int(m.instance_tag).int(m.number).raw(&m.mac);
            }
            Self::Success(m) => {
                enc.int(m.instance_tag).raw(&m.mac);
            }
            Self::Failure(m) => {
                enc.int(m.instance_tag).raw(&m.mac);
            }
            Self::EnsembleRetrievalQuery(m) => {
                enc.int(m.instance_tag)
                    .data(m.identity.as_bytes())
                    .data(&m.versions);
            }
            Self::EnsembleRetrieval(m) => {
                enc.int(m.instance_tag).count(m.ensembles.len());
                for ensemble in &m.ensembles {
                    ensemble.encode(&mut enc);
                }
            }
            Self::NoPrekeyEnsembles(m) => {
                enc.int(m.instance_tag).data(m.message.as_bytes());
            }
        }
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (mut dec, message_type) = read_header(bytes)?;
        let message = match message_type {
            MSG_DAKE1 => Self::Dake1(Dake1::decode_body(&mut dec)?),
            MSG_DAKE2 => Self::Dake2(Dake2::decode_body(&mut dec)?),
            MSG_DAKE3 => Self::Dake3(Dake3::decode_body(&mut dec)?),
            MSG_PUBLICATION => Self::Publication(Publication::decode_body(&mut dec)?),
            MSG_STORAGE_INFO_REQUEST => {
                Self::StorageInformationRequest(StorageInformationRequest { mac: dec.array()? })
            }
            MSG_STORAGE_STATUS => Self::StorageStatus(StorageStatus {
                instance_tag: dec.int()?,
                number: dec.int()?,
                mac: dec.array()?,
            }),
            MSG_SUCCESS => Self::Success(Success {
                instance_tag: dec.int()?,
                mac: dec.array()?,
            }),
            MSG_FAILURE => Self::Failure(Failure {
                instance_tag: dec.int()?,
                mac: dec.array()?,
            }),
            MSG_ENSEMBLE_RETRIEVAL_QUERY => Self::EnsembleRetrievalQuery(EnsembleRetrievalQuery {
                instance_tag: dec.int()?,
                identity: utf8(dec.data()?)?,
                versions: dec.data()?.to_vec(),
            }),
            MSG_ENSEMBLE_RETRIEVAL => {
                let instance_tag = dec.int()?;
                let count = dec.byte()?;
                let ensembles = (0..count)
                    .map(|_| PrekeyEnsemble::decode(&mut dec))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::EnsembleRetrieval(EnsembleRetrieval {
                    instance_tag,
                    ensembles,
                })
            }
            MSG_NO_PREKEY_ENSEMBLES => Self::NoPrekeyEnsembles(NoPrekeyEnsembles {
                instance_tag: dec.int()?,
                message: utf8(dec.data()?)?,
            }),
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        dec.finish()?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prekey_crypto::keys::{Keypair, LongTermKey};
    use prekey_crypto::FixedRandom;

    const TAG: u32 = 0x1245_ABCD;
    const LATER: u64 = 4_000_000_000;
    const MK: MacKey = [0x5A; 64];

    fn client_key() -> LongTermKey {
        LongTermKey::from_seed(&[7; 32])
    }

    fn roundtrip(message: &Message) {
        let bytes = message.encode().unwrap();
        assert_eq!(bytes[..2], [0x00, 0x04]);
        assert_eq!(bytes[2], message.message_type());
        assert_eq!(&Message::decode(&bytes).unwrap(), message);
    }

    fn sample_publication() -> Publication {
        let key = client_key();
        let cp = ClientProfile::sign(&key, 1, TAG, vec![4], LATER).unwrap();
        let shared = *Keypair::derive(&[8; 32]).public();
        let pp = PrekeyProfile::sign(&key, 2, TAG, LATER, shared).unwrap();
        let y = *Keypair::derive(&[9; 32]).public();
        let pm = PrekeyMessage::sign(&key, 3, TAG, y, vec![1; 4]).unwrap();
        Publication::new(&MK, vec![pm], Some(cp), Some(pp)).unwrap()
    }

    #[test]
    fn header_errors() {
        assert!(matches!(Message::decode(&[0, 4]), Err(ProtocolError::TooShort)));
        assert!(matches!(
            Message::decode(&[0, 3, MSG_SUCCESS]),
            Err(ProtocolError::InvalidVersion)
        ));
        let err = Message::decode(&[0, 4, 0x42]).unwrap_err();
        assert_eq!(err.to_string(), "unknown message type: 0x42");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = Message::Success(Success::new(&MK, TAG)).encode().unwrap();
        bytes.push(0);
        assert!(matches!(Message::decode(&bytes), Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn mac_messages_verify_with_their_key() {
        let status = StorageStatus::new(&MK, TAG, 3);
        assert!(status.verify_mac(&MK));
        assert!(!status.verify_mac(&[0; 64]));
        assert!(StorageInformationRequest::new(&MK).verify_mac(&MK));
        assert!(Success::new(&MK, TAG).verify_mac(&MK));
        assert!(!Failure::new(&MK, TAG).verify_mac(&[1; 64]));

        let mut publication = sample_publication();
        assert!(publication.verify_mac(&MK).unwrap());
        publication.prekey_messages[0].b[0] ^= 1;
        assert!(!publication.verify_mac(&MK).unwrap());
    }

    #[test]
    fn every_message_roundtrips() {
        let key = client_key();
        let cp = ClientProfile::sign(&key, 1, TAG, vec![4], LATER).unwrap();
        let server = LongTermKey::from_seed(&[1; 32]);
        let ephemeral = Keypair::derive(&[2; 32]);
        let mut rng = FixedRandom::new((1u8..=255).collect::<Vec<_>>());
        let sigma = RingSignature::generate(
            &mut rng,
            &server.keypair(),
            &key.public_point(),
            &server.public_point(),
            ephemeral.public(),
            b"transcript",
        )
        .unwrap();
        let publication = sample_publication();
        let ensemble = PrekeyEnsemble {
            client_profile: publication.client_profile.clone().unwrap(),
            prekey_profile: publication.prekey_profile.clone().unwrap(),
            prekey_message: publication.prekey_messages[0].clone(),
        };

        roundtrip(&Message::Dake1(Dake1 {
            instance_tag: TAG,
            client_profile: cp,
            i: *Keypair::derive(&[4; 32]).public(),
        }));
        roundtrip(&Message::Dake2(Dake2 {
            instance_tag: TAG,
            server_identity: "prekeys.example.org".into(),
            server_fingerprint: server.fingerprint(),
            s: *ephemeral.public(),
            sigma,
        }));
        roundtrip(&Message::Dake3(Dake3 {
            instance_tag: TAG,
            sigma,
            payload: Dake3Payload::Publication(publication.clone()),
        }));
        roundtrip(&Message::Publication(publication));
        roundtrip(&Message::StorageStatus(StorageStatus::new(&MK, TAG, 9)));
        roundtrip(&Message::Failure(Failure::new(&MK, TAG)));
        roundtrip(&Message::EnsembleRetrievalQuery(EnsembleRetrievalQuery {
            instance_tag: TAG,
            identity: "bob@example.org".into(),
            versions: vec![4],
        }));
        roundtrip(&Message::EnsembleRetrieval(EnsembleRetrieval {
            instance_tag: TAG,
            ensembles: vec![ensemble.clone(), ensemble],
        }));
        roundtrip(&Message::NoPrekeyEnsembles(NoPrekeyEnsembles::new(TAG)));
    }

    fn sample_sigma() -> RingSignature {
        let server = LongTermKey::from_seed(&[1; 32]);
        let mut rng = FixedRandom::new((1u8..=255).collect::<Vec<_>>());
        RingSignature::generate(
            &mut rng,
            &server.keypair(),
            &client_key().public_point(),
            &server.public_point(),
            Keypair::derive(&[2; 32]).public(),
            b"t",
        )
        .unwrap()
    }

    fn wrap_in_dake3(sigma: &RingSignature, inner: &[u8]) -> Vec<u8> {
        Encoder::new()
            .short(PROTOCOL_VERSION)
            .byte(MSG_DAKE3)
            .int(TAG)
            .ring_signature(sigma)
            .data(inner)
            .finish()
            .unwrap()
    }

    #[test]
    fn dake3_rejects_foreign_payloads() {
        let inner = Message::Success(Success::new(&MK, TAG)).encode().unwrap();
        let bytes = wrap_in_dake3(&sample_sigma(), &inner);
        assert!(matches!(
            Message::decode(&bytes),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn deeply_nested_dake3_is_refused() {
        let sigma = sample_sigma();
        let request = Message::StorageInformationRequest(StorageInformationRequest::new(&MK));
        let mut bytes = wrap_in_dake3(&sigma, &request.encode().unwrap());
        assert!(Message::decode(&bytes).is_ok());

        for _ in 0..1000 {
            bytes = wrap_in_dake3(&sigma, &bytes);
        }
        let err = Message::decode(&bytes).unwrap_err();
        assert_eq!(
            err.to_string(),
            "deserialization error: DAKE3 cannot carry message type 0x37"
        );
    }
}
