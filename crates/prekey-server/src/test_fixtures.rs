//! Client side of the prekey server protocol, used by tests to drive a
//! real server through the DAKE and the storage operations.

use std::sync::Arc;

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::{CryptoError, FixedRandom, Keypair, LongTermKey, RingSignature};
use prekey_protocol::mac;
use prekey_protocol::{
    ClientProfile, Dake1, Dake2, Dake3, Dake3Payload, DakeContext, MacKey, Message, PrekeyMessage,
    PrekeyProfile, Publication, StorageInformationRequest,
};

use crate::server_state::ServerState;
use crate::storage::{InMemoryStorage, Storage};

pub const SERVER_IDENTITY: &str = "masterOfKeys.example.org";
pub const SITA: &str = "sita@example.org";
pub const SITA_TAG: u32 = 0x1245_ABCD;
pub const RAMA: &str = "rama@example.org";
pub const EXPIRATION: u64 = 4_000_000_000;

fn seed(prefix: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..prefix.len()].copy_from_slice(prefix);
    out
}

pub fn fixture_rng() -> FixedRandom {
    FixedRandom::new((0u8..=255).rev().collect::<Vec<_>>())
}

pub fn server_key() -> LongTermKey {
    LongTermKey::from_seed(&[0x25; 32])
}

pub fn server_state_with(storage: Arc<dyn Storage>) -> ServerState {
    ServerState::new(SERVER_IDENTITY, server_key(), storage, Box::new(fixture_rng()))
}

pub fn server_state() -> (ServerState, Arc<InMemoryStorage>) {
    let storage = Arc::new(InMemoryStorage::new());
    (server_state_with(storage.clone()), storage)
}

pub fn decode(bytes: &[u8]) -> Message {
    Message::decode(bytes).expect("reply decodes")
}

pub fn expect_dake2(bytes: &[u8]) -> Dake2 {
    match decode(bytes) {
        Message::Dake2(m) => m,
        other => panic!("expected DAKE2, got {other:?}"),
    }
}

pub struct TestClient {
    pub identity: &'static str,
    pub instance_tag: u32,
    pub long_term: LongTermKey,
    pub profile: ClientProfile,
    pub ephemeral: Keypair,
    rng: FixedRandom,
}

impl TestClient {
    pub fn sita() -> Self {
        Self::new(
            SITA,
            SITA_TAG,
            &[0x42, 0x00, 0x00, 0x55, 0x55, 0x00, 0x00, 0x55],
            &[0x42, 0x11, 0xCC, 0x22, 0xDD, 0x11, 0xFF],
        )
    }

    /// A second client whose profile shares Sita's instance tag.
    pub fn rama() -> Self {
        Self::new(RAMA, SITA_TAG, &[0x17, 0x29, 0x3A], &[0x5E, 0x6F])
    }

    fn new(
        identity: &'static str,
        instance_tag: u32,
        key_seed: &[u8],
        ephemeral_seed: &[u8],
    ) -> Self {
        let long_term = LongTermKey::from_seed(&seed(key_seed));
        let profile =
            ClientProfile::sign(&long_term, 0xAABB_CCDD, instance_tag, vec![0x04], EXPIRATION)
                .expect("client profile");
        Self {
            identity,
            instance_tag,
            long_term,
            profile,
            ephemeral: Keypair::derive(&seed(ephemeral_seed)),
            rng: FixedRandom::new((1u8..=200).collect::<Vec<_>>()),
        }
    }

    pub fn dake1(&self) -> Vec<u8> {
        Message::Dake1(Dake1 {
            instance_tag: self.instance_tag,
            client_profile: self.profile.clone(),
            i: *self.ephemeral.public(),
        })
        .encode()
        .expect("DAKE1 encodes")
    }

    fn context<'a>(&'a self, dake2: &'a Dake2) -> DakeContext<'a> {
        DakeContext {
            client_profile: &self.profile,
            client_identity: self.identity,
            server_identity: &dake2.server_identity,
            server_fingerprint: &dake2.server_fingerprint,
            client_ephemeral: self.ephemeral.public(),
            server_ephemeral: &dake2.s,
        }
    }

    pub fn verify_dake2(
        &self,
        dake2: &Dake2,
        server_public: &EdwardsPoint,
    ) -> Result<(), CryptoError> {
        let transcript = self.context(dake2).dake2_transcript().expect("transcript");
        dake2
            .sigma
            .verify(&self.profile.public_key, server_public, &dake2.s, &transcript)
    }

    pub fn mac_key(&self, dake2: &Dake2) -> MacKey {
        mac::mac_key(&self.ephemeral.diffie_hellman(&dake2.s))
    }

    pub fn dake3(&mut self, dake2: &Dake2, payload: Dake3Payload) -> Vec<u8> {
        let transcript = self.context(dake2).dake3_transcript().expect("transcript");
        let sigma = RingSignature::generate(
            &mut self.rng,
            &self.long_term.keypair(),
            &self.profile.public_key,
            &server_key().public_point(),
            &dake2.s,
            &transcript,
        )
        .expect("client is in the ring");
        Message::Dake3(Dake3 {
            instance_tag: self.instance_tag,
            sigma,
            payload,
        })
        .encode()
        .expect("DAKE3 encodes")
    }

    pub fn storage_request(&self, dake2: &Dake2) -> Dake3Payload {
        Dake3Payload::StorageInformation(StorageInformationRequest::new(&self.mac_key(dake2)))
    }

    pub fn prekey_messages(&self, count: u32) -> Vec<PrekeyMessage> {
        (0..count)
            .map(|n| {
                let y = *Keypair::derive(&seed(&[0x70, n.to_le_bytes()[0]])).public();
                let id = 0x1000 + n;
                PrekeyMessage::sign(&self.long_term, id, self.instance_tag, y, vec![0xB0; 8])
                    .expect("prekey message")
            })
            .collect()
    }

    pub fn prekey_profile(&self) -> PrekeyProfile {
        let shared = *Keypair::derive(&seed(&[0x51])).public();
        PrekeyProfile::sign(&self.long_term, 0x2000, self.instance_tag, EXPIRATION, shared)
            .expect("prekey profile")
    }

    pub fn publication(&self, mac_key: &MacKey, count: u32) -> Publication {
        Publication::new(
            mac_key,
            self.prekey_messages(count),
            Some(self.profile.clone()),
            Some(self.prekey_profile()),
        )
        .expect("publication")
    }
}
