//! Per-identity DAKE sessions.
//!
//! A session is created lazily on first contact, carries the handshake
//! state needed to derive the MAC key and is removed once the client's
//! publication has been answered or when the sweep finds it idle for
//! longer than the session timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use curve25519_dalek::edwards::EdwardsPoint;
use parking_lot::Mutex;
use prekey_crypto::Keypair;
use prekey_protocol::mac;
use prekey_protocol::{ClientProfile, MacKey};

/// Where a live session stands. Completed and expired sessions are
/// removed from the manager rather than kept in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingDake3,
    Authenticated,
}

/// Handshake material saved when DAKE2 is sent.
#[derive(Debug)]
struct Handshake {
    ephemeral: Keypair,
    client_point: EdwardsPoint,
    client_profile: ClientProfile,
}

#[derive(Debug)]
pub struct Session {
    handshake: Option<Handshake>,
    instance_tag: u32,
    state: SessionState,
    last_touched: Instant,
}

impl Session {
    fn new(now: Instant) -> Self {
        Self {
            handshake: None,
            instance_tag: 0,
            state: SessionState::Idle,
            last_touched: now,
        }
    }

    /// Install the server's ephemeral keypair and the client's DAKE1 data.
    pub fn save(
        &mut self,
        ephemeral: Keypair,
        client_point: EdwardsPoint,
        client_profile: ClientProfile,
        instance_tag: u32,
    ) {
        self.handshake = Some(Handshake {
            ephemeral,
            client_point,
            client_profile,
        });
        self.instance_tag = instance_tag;
        self.state = SessionState::AwaitingDake3;
    }

    pub fn authenticate(&mut self) {
        self.state = SessionState::Authenticated;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn instance_tag(&self) -> u32 {
        self.instance_tag
    }

    pub fn client_profile(&self) -> Option<&ClientProfile> {
        self.handshake.as_ref().map(|h| &h.client_profile)
    }

    /// Client ephemeral point `I`.
    pub fn client_point(&self) -> Option<&EdwardsPoint> {
        self.handshake.as_ref().map(|h| &h.client_point)
    }

    /// Server ephemeral point `S`.
    pub fn server_point(&self) -> Option<&EdwardsPoint> {
        self.handshake.as_ref().map(|h| h.ephemeral.public())
    }

    /// Derived from `I * s` on every call; never cached.
    pub fn mac_key(&self) -> Option<MacKey> {
        self.handshake
            .as_ref()
            .map(|h| mac::mac_key(&h.ephemeral.diffie_hellman(&h.client_point)))
    }
}

/// All live sessions, keyed by sender identity.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the session for `identity`, creating it if needed.
    /// The lookup, creation and `f` happen under one lock.
    pub fn with_session<T>(
        &self,
        identity: &str,
        now: Instant,
        f: impl FnOnce(&mut Session) -> T,
    ) -> T {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(identity.to_string()).or_insert_with(|| {
            tracing::info!(identity = %identity, "session created");
            Session::new(now)
        });
        session.last_touched = now;
        f(session)
    }

    /// Like [`Self::with_session`] but never creates one.
    pub fn with_existing<T>(
        &self,
        identity: &str,
        now: Instant,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(identity)?;
        session.last_touched = now;
        Some(f(session))
    }

    pub fn has_session(&self, identity: &str) -> bool {
        self.sessions.lock().contains_key(identity)
    }

    /// Drop the session for `identity`. No-op if there is none.
    pub fn complete(&self, identity: &str) {
        if self.sessions.lock().remove(identity).is_some() {
            tracing::info!(identity = %identity, "session completed");
        }
    }

    /// Remove every session idle for strictly longer than `timeout`.
    pub fn sweep(&self, timeout: Duration, now: Instant) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|identity, session| {
            let keep = now.saturating_duration_since(session.last_touched) <= timeout;
            if !keep {
                tracing::debug!(identity = %identity, "session expired");
            }
            keep
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prekey_crypto::LongTermKey;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn sessions_are_created_lazily() {
        let manager = SessionManager::new();
        assert!(!manager.has_session("someone@example.org"));
        let state = manager.with_session("someone@example.org", Instant::now(), |s| s.state());
        assert_eq!(state, SessionState::Idle);
        assert!(manager.has_session("someone@example.org"));
        assert!(manager
            .with_existing("another@example.org", Instant::now(), |s| s.state())
            .is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn complete_without_session_is_a_no_op() {
        let manager = SessionManager::new();
        manager.complete("someone@example.org");
        assert!(manager.is_empty());
    }

    #[test]
    fn sweep_removes_old_sessions() {
        let manager = SessionManager::new();
        let start = Instant::now();
        manager.with_session("someone@example.org", start, |_| ());
        manager.with_session("another@example.org", start + 30 * MINUTE, |_| ());

        assert_eq!(manager.sweep(30 * MINUTE, start + 56 * MINUTE), 1);
        assert!(!manager.has_session("someone@example.org"));
        assert!(manager.has_session("another@example.org"));
    }

    #[test]
    fn sweep_keeps_sessions_exactly_at_the_timeout() {
        let manager = SessionManager::new();
        let start = Instant::now();
        manager.with_session("edge@example.org", start, |_| ());
        assert_eq!(manager.sweep(30 * MINUTE, start + 30 * MINUTE), 0);
        assert_eq!(manager.sweep(30 * MINUTE, start + 30 * MINUTE + Duration::from_nanos(1)), 1);
        assert_eq!(manager.sweep(30 * MINUTE, start), 0);
    }

    #[test]
    fn mac_key_needs_a_handshake_and_matches_the_client() {
        let manager = SessionManager::new();
        let now = Instant::now();
        assert!(manager.with_session("sita@example.org", now, |s| s.mac_key()).is_none());

        let client_long_term = LongTermKey::from_seed(&[0x42; 32]);
        let profile =
            ClientProfile::sign(&client_long_term, 1, 0x1245_ABCD, vec![4], 4_000_000_000).unwrap();
        let client = Keypair::derive(&[0x11; 32]);
        let server = Keypair::derive(&[0x22; 32]);
        let server_public = *server.public();

        let (key, state) = manager.with_session("sita@example.org", now, |s| {
            s.save(server, *client.public(), profile, 0x1245_ABCD);
            (s.mac_key(), s.state())
        });
        assert_eq!(state, SessionState::AwaitingDake3);
        assert_eq!(key, Some(mac::mac_key(&client.diffie_hellman(&server_public))));
        assert_eq!(
            manager.with_existing("sita@example.org", now, |s| s.instance_tag()),
            Some(0x1245_ABCD)
        );
    }
}
