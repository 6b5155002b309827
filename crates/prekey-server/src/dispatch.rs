//! Validation and response for every inbound message type.
//!
//! `validate` never mutates sessions or storage. `respond` runs only on
//! messages that passed validation and performs the side effects.

use std::time::Instant;

use curve25519_dalek::edwards::EdwardsPoint;
use prekey_crypto::{Keypair, RingSignature};
use prekey_protocol::message::PROTOCOL_VERSION;
use prekey_protocol::{
    Dake1, Dake2, Dake3, Dake3Payload, DakeContext, EnsembleRetrieval, EnsembleRetrievalQuery,
    Failure, MacKey, Message, NoPrekeyEnsembles, Publication, StorageInformationRequest,
    StorageStatus, Success,
};
use zeroize::Zeroize;

use crate::error::ServerError;
use crate::server_state::{timestamp_now_secs, ServerState};
use crate::session::{Session, SessionState};
use crate::storage::Storage;

/// Session material needed to check and answer MAC-bearing messages.
struct SessionKeys {
    mac_key: MacKey,
    instance_tag: u32,
    /// Long-term key of the authenticated client.
    owner: EdwardsPoint,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.mac_key.zeroize();
    }
}

fn session_keys(session: &Session, required: SessionState) -> Option<SessionKeys> {
    if session.state() != required {
        return None;
    }
    Some(SessionKeys {
        mac_key: session.mac_key()?,
        instance_tag: session.instance_tag(),
        owner: session.client_profile()?.public_key,
    })
}

fn authenticated(from: &str, state: &ServerState) -> Result<SessionKeys, ServerError> {
    state
        .sessions()
        .with_existing(from, Instant::now(), |session| {
            session_keys(session, SessionState::Authenticated)
        })
        .flatten()
        .ok_or(ServerError::NotAuthenticated)
}

pub(crate) fn validate(
    message: &Message,
    from: &str,
    state: &ServerState,
) -> Result<(), ServerError> {
    let now = timestamp_now_secs();
    match message {
        Message::Dake1(m) => m
            .client_profile
            .validate(m.instance_tag, now)
            .map_err(|e| ServerError::InvalidClientProfile(e.to_string())),
        Message::Dake3(m) => validate_dake3(m, from, state, now),
        Message::Publication(m) => validate_publication(m, &authenticated(from, state)?, now),
        Message::StorageInformationRequest(m) => {
            validate_storage_info(m, &authenticated(from, state)?)
        }
        Message::EnsembleRetrievalQuery(m) if m.instance_tag == 0 => {
            Err(ServerError::ZeroInstanceTag)
        }
        Message::EnsembleRetrievalQuery(_) => Ok(()),
        Message::Dake2(_)
        | Message::StorageStatus(_)
        | Message::Success(_)
        | Message::Failure(_)
        | Message::EnsembleRetrieval(_)
        | Message::NoPrekeyEnsembles(_) => {
            Err(ServerError::UnexpectedMessage(message.message_type()))
        }
    }
}

/// Check a DAKE3 against the handshake currently held in `session`.
///
/// Runs under the session lock, so the handshake that verifies is the one
/// the caller goes on to use.
fn check_dake3(
    m: &Dake3,
    from: &str,
    state: &ServerState,
    session: &Session,
    now: u64,
) -> Result<SessionKeys, ServerError> {
    if session.state() != SessionState::AwaitingDake3 {
        return Err(ServerError::NotAwaitingDake3);
    }
    let (Some(profile), Some(i), Some(s)) = (
        session.client_profile(),
        session.client_point(),
        session.server_point(),
    ) else {
        return Err(ServerError::NotAwaitingDake3);
    };
    if m.instance_tag != session.instance_tag() {
        return Err(ServerError::InstanceTagMismatch {
            expected: session.instance_tag(),
            received: m.instance_tag,
        });
    }

    let transcript = DakeContext {
        client_profile: profile,
        client_identity: from,
        server_identity: state.identity(),
        server_fingerprint: state.fingerprint(),
        client_ephemeral: i,
        server_ephemeral: s,
    }
    .dake3_transcript()?;
    m.sigma
        .verify(&profile.public_key, &state.key().public_point(), s, &transcript)
        .map_err(|_| ServerError::InvalidRingSignature)?;

    let keys = session_keys(session, SessionState::AwaitingDake3)
        .ok_or(ServerError::NotAwaitingDake3)?;
    match &m.payload {
        Dake3Payload::StorageInformation(request) => validate_storage_info(request, &keys)?,
        Dake3Payload::Publication(publication) => validate_publication(publication, &keys, now)?,
    }
    Ok(keys)
}

fn validate_dake3(m: &Dake3, from: &str, state: &ServerState, now: u64) -> Result<(), ServerError> {
    state
        .sessions()
        .with_existing(from, Instant::now(), |session| {
            check_dake3(m, from, state, session, now).map(|_| ())
        })
        .unwrap_or(Err(ServerError::NotAwaitingDake3))
}

fn validate_storage_info(
    m: &StorageInformationRequest,
    keys: &SessionKeys,
) -> Result<(), ServerError> {
    if m.verify_mac(&keys.mac_key) {
        Ok(())
    } else {
        Err(ServerError::IncorrectMac)
    }
}

fn validate_publication(m: &Publication, keys: &SessionKeys, now: u64) -> Result<(), ServerError> {
    if !m.verify_mac(&keys.mac_key)? {
        return Err(ServerError::PublicationMac);
    }
    if let Some(profile) = &m.client_profile {
        if profile.validate(keys.instance_tag, now).is_err() || profile.public_key != keys.owner {
            return Err(ServerError::PublicationClientProfile);
        }
    }
    if let Some(profile) = &m.prekey_profile {
        profile
            .validate(keys.instance_tag, &keys.owner, now)
            .map_err(|_| ServerError::PublicationPrekeyProfile)?;
    }
    for prekey_message in &m.prekey_messages {
        prekey_message
            .validate(keys.instance_tag, &keys.owner)
            .map_err(|_| ServerError::PublicationPrekeyMessage)?;
    }
    Ok(())
}

pub(crate) fn respond(
    message: Message,
    from: &str,
    state: &ServerState,
) -> Result<Message, ServerError> {
    match message {
        Message::Dake1(m) => respond_dake1(m, from, state).map(Message::Dake2),
        Message::Dake3(m) => respond_dake3(m, from, state),
        Message::Publication(m) => {
            let keys = authenticated(from, state)?;
            Ok(respond_publication(m, from, state, &keys))
        }
        Message::StorageInformationRequest(_) => {
            let keys = authenticated(from, state)?;
            respond_storage_info(from, state, &keys).map(Message::StorageStatus)
        }
        Message::EnsembleRetrievalQuery(m) => respond_retrieval(m, state),
        other => Err(ServerError::UnexpectedMessage(other.message_type())),
    }
}

fn respond_dake1(m: Dake1, from: &str, state: &ServerState) -> Result<Dake2, ServerError> {
    let ephemeral = state.with_rng(|rng| Keypair::generate(rng));
    let s = *ephemeral.public();

    let transcript = DakeContext {
        client_profile: &m.client_profile,
        client_identity: from,
        server_identity: state.identity(),
        server_fingerprint: state.fingerprint(),
        client_ephemeral: &m.i,
        server_ephemeral: &s,
    }
    .dake2_transcript()?;

    let signer = state.key().keypair();
    let sigma = state.with_rng(|rng| {
        RingSignature::generate(
            rng,
            &signer,
            &m.client_profile.public_key,
            signer.public(),
            &s,
            &transcript,
        )
    })?;

    let Dake1 {
        instance_tag,
        client_profile,
        i,
    } = m;
    state.sessions().with_session(from, Instant::now(), |session| {
        session.save(ephemeral, i, client_profile, instance_tag);
    });
    tracing::info!(identity = %from, instance_tag, "DAKE2 sent, awaiting DAKE3");

    Ok(Dake2 {
        instance_tag,
        server_identity: state.identity().to_string(),
        server_fingerprint: *state.fingerprint(),
        s,
        sigma,
    })
}

fn respond_dake3(m: Dake3, from: &str, state: &ServerState) -> Result<Message, ServerError> {
    let now = timestamp_now_secs();
    let keys = state
        .sessions()
        .with_existing(from, Instant::now(), |session| -> Result<SessionKeys, ServerError> {
            let keys = check_dake3(&m, from, state, session, now)?;
            session.authenticate();
            Ok(keys)
        })
        .unwrap_or(Err(ServerError::NotAwaitingDake3))?;
    tracing::info!(identity = %from, "session authenticated");

    match m.payload {
        Dake3Payload::StorageInformation(_) => {
            respond_storage_info(from, state, &keys).map(Message::StorageStatus)
        }
        Dake3Payload::Publication(publication) => {
            Ok(respond_publication(publication, from, state, &keys))
        }
    }
}

fn respond_storage_info(
    from: &str,
    state: &ServerState,
    keys: &SessionKeys,
) -> Result<StorageStatus, ServerError> {
    let number = state.storage().number_stored(from, keys.instance_tag)?;
    Ok(StorageStatus::new(&keys.mac_key, keys.instance_tag, number))
}

fn store_publication(m: Publication, from: &str, storage: &dyn Storage) -> Result<(), ServerError> {
    let Publication {
        prekey_messages,
        client_profile,
        prekey_profile,
        ..
    } = m;
    if let Some(profile) = client_profile {
        storage.store_client_profile(from, profile)?;
    }
    if let Some(profile) = prekey_profile {
        storage.store_prekey_profile(from, profile)?;
    }
    storage.store_prekey_messages(from, prekey_messages)
}

/// Store the publication and close the session whatever the outcome.
fn respond_publication(
    m: Publication,
    from: &str,
    state: &ServerState,
    keys: &SessionKeys,
) -> Message {
    let count = m.prekey_messages.len();
    let stored = store_publication(m, from, state.storage());
    state.sessions().complete(from);

    match stored {
        Ok(()) => {
            tracing::debug!(identity = %from, prekey_messages = count, "publication stored");
            Message::Success(Success::new(&keys.mac_key, keys.instance_tag))
        }
        Err(e) => {
            tracing::warn!(identity = %from, error = %e, "failed to store publication");
            Message::Failure(Failure::new(&keys.mac_key, keys.instance_tag))
        }
    }
}

fn respond_retrieval(
    m: EnsembleRetrievalQuery,
    state: &ServerState,
) -> Result<Message, ServerError> {
    let supported = m.versions.iter().any(|v| u16::from(*v) == PROTOCOL_VERSION);
    let ensembles = if supported {
        state.storage().retrieve_for(&m.identity, timestamp_now_secs())?
    } else {
        Vec::new()
    };

    if ensembles.is_empty() {
        tracing::debug!(identity = %m.identity, "no prekey ensembles available");
        return Ok(Message::NoPrekeyEnsembles(NoPrekeyEnsembles::new(m.instance_tag)));
    }
    Ok(Message::EnsembleRetrieval(EnsembleRetrieval {
        instance_tag: m.instance_tag,
        ensembles,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use prekey_crypto::LongTermKey;
    use prekey_protocol::message::MSG_SUCCESS;
    use prekey_protocol::{ClientProfile, PrekeyEnsemble, PrekeyMessage, PrekeyProfile};

    use super::*;
    use crate::handler::{MessageHandler, PrekeyMessageHandler};
    use crate::test_fixtures::{
        decode, expect_dake2, server_key, server_state, server_state_with, TestClient, EXPIRATION,
        RAMA, SERVER_IDENTITY, SITA, SITA_TAG,
    };

    fn handle(state: &ServerState, from: &str, bytes: &[u8]) -> Result<Message, ServerError> {
        PrekeyMessageHandler
            .handle_message(state, from, bytes)
            .map(|reply| decode(&reply))
    }

    fn session_state(state: &ServerState, identity: &str) -> Option<SessionState> {
        state
            .sessions()
            .with_existing(identity, Instant::now(), |s| s.state())
    }

    /// Run DAKE1 and return the server's DAKE2.
    fn open(state: &ServerState, client: &TestClient) -> Dake2 {
        let reply = PrekeyMessageHandler
            .handle_message(state, client.identity, &client.dake1())
            .unwrap();
        expect_dake2(&reply)
    }

    #[test]
    fn dake1_yields_a_verifiable_dake2() {
        let (state, _) = server_state();
        let client = TestClient::sita();
        let dake2 = open(&state, &client);

        assert_eq!(dake2.instance_tag, 0x1245_ABCD);
        assert_eq!(dake2.server_identity, SERVER_IDENTITY);
        assert_eq!(dake2.server_fingerprint, server_key().fingerprint());
        assert!(client.verify_dake2(&dake2, &server_key().public_point()).is_ok());
        assert_eq!(session_state(&state, SITA), Some(SessionState::AwaitingDake3));
    }

    #[test]
    fn dake2_is_deterministic_under_fixed_randomness() {
        let client = TestClient::sita();
        let (first, _) = server_state();
        let (second, _) = server_state();
        assert_eq!(open(&first, &client), open(&second, &client));
    }

    #[test]
    fn dake2_matches_fixed_vectors() {
        let (state, _) = server_state();
        let dake2 = open(&state, &TestClient::sita());

        assert_eq!(
            hex::encode(dake2.server_fingerprint),
            "e72c244ab0757f4b708da73c83ba33c56030a4204a596a1180c0f484\
             ff5ed53089b3eb85092c89809a5a4a21b8b423d940a6145a6f1fd196"
        );
        assert_eq!(
            hex::encode(dake2.s.compress().as_bytes()),
            "bafc71bead3ac5e4b63e9c8216ee71a34aaec65722eedbca728b4e9b3ccce396"
        );

        let sigma = &dake2.sigma;
        let expected = [
            (sigma.c1, "0ca52b76eaf9ab90cd978d6e4d2159a26be691c8b14355ca85b6d5e3a7c15900"),
            (sigma.r1, "1c036eed6ec89e2e56cd6c4db9c7cec6df8409802e35f4724d507d3440ff8809"),
            (sigma.c2, "911f31a76f77164d6e1062983099b8771d403808a71932cfc91e44aa2950e009"),
            (sigma.r2, "c4740fe68bc9601a974739b60015539f54aa8eeea5221a4881bb1830caf5770c"),
            (sigma.c3, "0f746d59a6017c459661d72cc72375ff6719150815b30cbd525408939bdf7e07"),
            (sigma.r3, "b74ee37e78578562eea0e0cffe36b1df9098f5c2bb08bb6aec0c58e39c95a703"),
        ];
        for (scalar, want) in expected {
            assert_eq!(hex::encode(scalar.to_bytes()), want);
        }
    }

    #[test]
    fn dake2_does_not_verify_for_a_different_client_identity() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        client.identity = RAMA;
        assert!(client.verify_dake2(&dake2, &server_key().public_point()).is_err());
    }

    #[test]
    fn dake1_with_invalid_profile_is_rejected() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        client.profile.expiration += 1;
        let err = handle(&state, SITA, &client.dake1()).unwrap_err();
        assert!(matches!(err, ServerError::InvalidClientProfile(_)));
        assert!(!state.sessions().has_session(SITA));

        let mut client = TestClient::sita();
        client.instance_tag = SITA_TAG + 1;
        assert!(handle(&state, SITA, &client.dake1()).is_err());
    }

    #[test]
    fn storage_information_reports_stored_count() {
        let (state, storage) = server_state();
        let mut client = TestClient::sita();
        storage.store_prekey_messages(SITA, client.prekey_messages(3)).unwrap();

        let dake2 = open(&state, &client);
        let request = client.storage_request(&dake2);
        let reply = handle(&state, SITA, &client.dake3(&dake2, request)).unwrap();

        let Message::StorageStatus(status) = reply else {
            panic!("expected storage status, got {reply:?}");
        };
        assert_eq!(status.instance_tag, SITA_TAG);
        assert_eq!(status.number, 3);
        assert!(status.verify_mac(&client.mac_key(&dake2)));
        assert_eq!(session_state(&state, SITA), Some(SessionState::Authenticated));

        let request = StorageInformationRequest::new(&client.mac_key(&dake2));
        let again = Message::StorageInformationRequest(request);
        let reply = handle(&state, SITA, &again.encode().unwrap()).unwrap();
        assert!(matches!(reply, Message::StorageStatus(StorageStatus { number: 3, .. })));
    }

    #[test]
    fn incorrect_mac_is_rejected_without_side_effects() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);

        let forged = Dake3Payload::StorageInformation(StorageInformationRequest::new(&[0u8; 64]));
        let err = handle(&state, SITA, &client.dake3(&dake2, forged)).unwrap_err();
        assert_eq!(err.to_string(), "incorrect MAC");
        assert_eq!(session_state(&state, SITA), Some(SessionState::AwaitingDake3));
    }

    #[test]
    fn dake3_over_the_wrong_transcript_is_rejected() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let mut dake2 = open(&state, &client);
        let request = client.storage_request(&dake2);
        dake2.server_identity = "impostor.example.org".into();

        let err = handle(&state, SITA, &client.dake3(&dake2, request)).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRingSignature));
    }

    #[test]
    fn dake3_needs_a_pending_handshake() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let request = client.storage_request(&dake2);
        let dake3 = client.dake3(&dake2, request);

        let (fresh, _) = server_state();
        assert!(matches!(handle(&fresh, SITA, &dake3), Err(ServerError::NotAwaitingDake3)));

        handle(&state, SITA, &dake3).unwrap();
        assert!(matches!(handle(&state, SITA, &dake3), Err(ServerError::NotAwaitingDake3)));
    }

    #[test]
    fn handshake_replaced_after_validation_does_not_authenticate() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let request = client.storage_request(&dake2);
        let dake3 = decode(&client.dake3(&dake2, request));
        validate(&dake3, SITA, &state).unwrap();

        let reply = handle(&state, SITA, &TestClient::rama().dake1()).unwrap();
        assert!(matches!(reply, Message::Dake2(_)));

        let err = respond(dake3, SITA, &state).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRingSignature));
        assert_eq!(session_state(&state, SITA), Some(SessionState::AwaitingDake3));
    }

    #[test]
    fn dake3_with_a_different_instance_tag_is_rejected() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let request = client.storage_request(&dake2);
        client.instance_tag = SITA_TAG + 1;

        let err = handle(&state, SITA, &client.dake3(&dake2, request)).unwrap_err();
        assert!(matches!(
            err,
            ServerError::InstanceTagMismatch { expected: SITA_TAG, received }
                if received == SITA_TAG + 1
        ));
        assert_eq!(session_state(&state, SITA), Some(SessionState::AwaitingDake3));
    }

    #[test]
    fn publication_in_dake3_is_stored_and_completes_the_session() {
        let (state, storage) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mac_key = client.mac_key(&dake2);
        let publication = Dake3Payload::Publication(client.publication(&mac_key, 3));

        let reply = handle(&state, SITA, &client.dake3(&dake2, publication)).unwrap();
        assert_eq!(reply.message_type(), MSG_SUCCESS);
        let Message::Success(success) = reply else { unreachable!() };
        assert!(success.verify_mac(&mac_key));
        assert_eq!(success.instance_tag, SITA_TAG);

        assert_eq!(storage.number_stored(SITA, SITA_TAG).unwrap(), 3);
        assert!(!state.sessions().has_session(SITA));
    }

    #[test]
    fn standalone_publication_after_authentication() {
        let (state, storage) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mac_key = client.mac_key(&dake2);

        let early = Message::Publication(client.publication(&mac_key, 2)).encode().unwrap();
        let (fresh, _) = server_state();
        assert!(matches!(handle(&fresh, SITA, &early), Err(ServerError::NotAuthenticated)));

        let request = client.storage_request(&dake2);
        handle(&state, SITA, &client.dake3(&dake2, request)).unwrap();
        let reply = handle(&state, SITA, &early).unwrap();
        assert!(matches!(reply, Message::Success(_)));
        assert_eq!(storage.number_stored(SITA, SITA_TAG).unwrap(), 2);
    }

    #[test]
    fn tampered_publication_is_rejected() {
        let (state, storage) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mut publication = client.publication(&client.mac_key(&dake2), 2);
        publication.prekey_messages[1].b[0] ^= 0x01;

        let dake3 = client.dake3(&dake2, Dake3Payload::Publication(publication));
        let err = handle(&state, SITA, &dake3).unwrap_err();
        assert!(matches!(err, ServerError::PublicationMac));
        assert_eq!(storage.number_stored(SITA, SITA_TAG).unwrap(), 0);
        assert!(state.sessions().has_session(SITA));
    }

    #[test]
    fn publication_with_foreign_prekey_messages_is_rejected() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mac_key = client.mac_key(&dake2);

        let stranger = LongTermKey::from_seed(&[0x99; 32]);
        let y = *Keypair::derive(&[0x98; 32]).public();
        let foreign = PrekeyMessage::sign(&stranger, 1, SITA_TAG, y, vec![]).unwrap();
        let publication = Publication::new(&mac_key, vec![foreign], None, None).unwrap();
        let dake3 = client.dake3(&dake2, Dake3Payload::Publication(publication));
        let err = handle(&state, SITA, &dake3).unwrap_err();
        assert_eq!(err.to_string(), "invalid prekey message in publication message");
    }

    /// Storage that refuses every write.
    struct FullStorage;

    impl Storage for FullStorage {
        fn store_client_profile(&self, _: &str, _: ClientProfile) -> Result<(), ServerError> {
            Err(ServerError::Storage("full".into()))
        }

        fn store_prekey_profile(&self, _: &str, _: PrekeyProfile) -> Result<(), ServerError> {
            Err(ServerError::Storage("full".into()))
        }

        fn store_prekey_messages(&self, _: &str, _: Vec<PrekeyMessage>) -> Result<(), ServerError> {
            Err(ServerError::Storage("full".into()))
        }

        fn number_stored(&self, _: &str, _: u32) -> Result<u32, ServerError> {
            Ok(0)
        }

        fn retrieve_for(&self, _: &str, _: u64) -> Result<Vec<PrekeyEnsemble>, ServerError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn storage_failure_replies_with_failure() {
        let state = server_state_with(Arc::new(FullStorage));
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mac_key = client.mac_key(&dake2);
        let publication = Dake3Payload::Publication(client.publication(&mac_key, 1));

        let reply = handle(&state, SITA, &client.dake3(&dake2, publication)).unwrap();
        let Message::Failure(failure) = reply else {
            panic!("expected failure, got {reply:?}");
        };
        assert!(failure.verify_mac(&mac_key));
        assert!(!state.sessions().has_session(SITA));
    }

    fn query(identity: &str, versions: Vec<u8>) -> Vec<u8> {
        Message::EnsembleRetrievalQuery(EnsembleRetrievalQuery {
            instance_tag: 0x0000_0101,
            identity: identity.into(),
            versions,
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn retrieval_hands_out_published_ensembles() {
        let (state, _) = server_state();
        let mut client = TestClient::sita();
        let dake2 = open(&state, &client);
        let mac_key = client.mac_key(&dake2);
        let publication = Dake3Payload::Publication(client.publication(&mac_key, 2));
        handle(&state, SITA, &client.dake3(&dake2, publication)).unwrap();

        for _ in 0..2 {
            let reply = handle(&state, RAMA, &query(SITA, vec![4])).unwrap();
            let Message::EnsembleRetrieval(retrieval) = reply else {
                panic!("expected ensembles, got {reply:?}");
            };
            assert_eq!(retrieval.instance_tag, 0x0000_0101);
            assert_eq!(retrieval.ensembles.len(), 1);
            let ensemble = &retrieval.ensembles[0];
            assert_eq!(ensemble.client_profile, client.profile);
            assert_eq!(ensemble.prekey_profile.expiration, EXPIRATION);
        }

        let reply = handle(&state, RAMA, &query(SITA, vec![4])).unwrap();
        assert!(matches!(reply, Message::NoPrekeyEnsembles(_)));
        assert!(!state.sessions().has_session(RAMA));
    }

    #[test]
    fn retrieval_without_material_or_version_gets_no_ensembles() {
        let (state, _) = server_state();
        let reply = handle(&state, RAMA, &query("nobody@example.org", vec![4])).unwrap();
        let Message::NoPrekeyEnsembles(none) = reply else {
            panic!("expected no ensembles, got {reply:?}");
        };
        assert_eq!(none.message, "No Prekey Messages available for this identity");
        assert_eq!(none.instance_tag, 0x0000_0101);

        let reply = handle(&state, RAMA, &query(SITA, vec![3])).unwrap();
        assert!(matches!(reply, Message::NoPrekeyEnsembles(_)));
    }

    #[test]
    fn retrieval_with_zero_instance_tag_is_rejected() {
        let (state, _) = server_state();
        let bytes = Message::EnsembleRetrievalQuery(EnsembleRetrievalQuery {
            instance_tag: 0,
            identity: SITA.into(),
            versions: vec![4],
        })
        .encode()
        .unwrap();
        let err = handle(&state, RAMA, &bytes).unwrap_err();
        assert_eq!(err.to_string(), "instance tag must not be zero");
        assert!(!state.sessions().has_session(RAMA));
    }

    #[test]
    fn server_only_messages_are_unexpected() {
        let (state, _) = server_state();
        let success = Message::Success(Success::new(&[0u8; 64], SITA_TAG)).encode().unwrap();
        let err = handle(&state, SITA, &success).unwrap_err();
        assert_eq!(err.to_string(), "unexpected message type: 0x6");
    }

    #[test]
    fn undecodable_messages_surface_protocol_errors() {
        let (state, _) = server_state();
        let err = handle(&state, SITA, &[0x00, 0x04, 0x42]).unwrap_err();
        assert_eq!(err.to_string(), "unknown message type: 0x42");
        let err = handle(&state, SITA, &[0x00, 0x03, 0x35]).unwrap_err();
        assert_eq!(err.to_string(), "invalid protocol version");
    }
}
