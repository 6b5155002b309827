use std::sync::Arc;

use parking_lot::Mutex;
use prekey_crypto::kdf::FINGERPRINT_LEN;
use prekey_crypto::{LongTermKey, RandomSource};

use crate::session::SessionManager;
use crate::storage::Storage;

/// Everything a message handler may touch while answering one message.
pub struct ServerState {
    /// Identity string this server announces in DAKE2.
    identity: String,
    key: LongTermKey,
    fingerprint: [u8; FINGERPRINT_LEN],
    sessions: SessionManager,
    storage: Arc<dyn Storage>,
    rng: Mutex<Box<dyn RandomSource + Send>>,
}

impl ServerState {
    pub fn new(
        identity: impl Into<String>,
        key: LongTermKey,
        storage: Arc<dyn Storage>,
        rng: Box<dyn RandomSource + Send>,
    ) -> Self {
        let fingerprint = key.fingerprint();
        Self {
            identity: identity.into(),
            key,
            fingerprint,
            sessions: SessionManager::new(),
            storage,
            rng: Mutex::new(rng),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn key(&self) -> &LongTermKey {
        &self.key
    }

    pub fn fingerprint(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.fingerprint
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Borrow the server's randomness for the duration of `f`.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut (dyn RandomSource + Send)) -> T) -> T {
        let mut rng = self.rng.lock();
        f(rng.as_mut())
    }

    /// Big-endian u32 from the next four random bytes.
    pub fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.with_rng(|rng| rng.fill_bytes(&mut bytes));
        u32::from_be_bytes(bytes)
    }
}

/// Wall-clock seconds since the Unix epoch, used for profile expiry.
pub fn timestamp_now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
