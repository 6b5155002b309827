use std::fmt;
use std::path::Path;
use std::time::Duration;

use prekey_crypto::keys::SEED_LEN;
use prekey_crypto::LongTermKey;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::ServerError;

const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_FRAGMENTATION_TIMEOUT_SECS: u64 = 6 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

fn default_session_timeout_secs() -> u64 {
    DEFAULT_SESSION_TIMEOUT_SECS
}

fn default_fragmentation_timeout_secs() -> u64 {
    DEFAULT_FRAGMENTATION_TIMEOUT_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
}

/// Server settings, read from a JSON file.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Identity announced to clients in DAKE2.
    pub identity: String,
    /// Hex-encoded 32-byte seed of the long-term key.
    pub key_seed: String,
    /// Maximum transport message length. Zero disables fragmentation.
    #[serde(default)]
    pub fragment_length: usize,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_fragmentation_timeout_secs")]
    pub fragmentation_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("identity", &self.identity)
            .field("key_seed", &"<redacted>")
            .field("fragment_length", &self.fragment_length)
            .field("session_timeout_secs", &self.session_timeout_secs)
            .field("fragmentation_timeout_secs", &self.fragmentation_timeout_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .finish()
    }
}

impl ServerConfig {
    pub fn new(identity: impl Into<String>, key_seed: &[u8; SEED_LEN]) -> Self {
        Self {
            identity: identity.into(),
            key_seed: hex::encode(key_seed),
            fragment_length: 0,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
            fragmentation_timeout_secs: DEFAULT_FRAGMENTATION_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ServerError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.identity.trim().is_empty() {
            return Err(ServerError::Config("identity must not be empty".into()));
        }
        if self.session_timeout_secs == 0 || self.fragmentation_timeout_secs == 0 {
            return Err(ServerError::Config("timeouts must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ServerError::Config("sweep interval must be positive".into()));
        }
        self.long_term_key().map(|_| ())
    }

    pub fn long_term_key(&self) -> Result<LongTermKey, ServerError> {
        let bytes = Zeroizing::new(
            hex::decode(&self.key_seed)
                .map_err(|e| ServerError::Config(format!("key seed is not hex: {e}")))?,
        );
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        if bytes.len() != SEED_LEN {
            return Err(ServerError::Config(format!(
                "key seed must be {SEED_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        seed.copy_from_slice(&bytes);
        Ok(LongTermKey::from_seed(&seed))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn fragmentation_timeout(&self) -> Duration {
        Duration::from_secs(self.fragmentation_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
