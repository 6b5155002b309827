//! Entry point for raw transport messages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use prekey_crypto::RandomSource;
use prekey_protocol::{envelope, fragment};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fragmentation::FragmentStore;
use crate::handler::{MessageHandler, PrekeyMessageHandler};
use crate::server_state::ServerState;
use crate::storage::Storage;

pub struct PrekeyServer {
    state: ServerState,
    handler: Arc<dyn MessageHandler>,
    fragments: FragmentStore,
    fragment_length: usize,
    session_timeout: Duration,
    fragmentation_timeout: Duration,
}

impl PrekeyServer {
    pub fn new(
        config: &ServerConfig,
        storage: Arc<dyn Storage>,
        rng: Box<dyn RandomSource + Send>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let key = config.long_term_key()?;
        let state = ServerState::new(config.identity.clone(), key, storage, rng);
        tracing::info!(
            identity = %config.identity,
            key = %state.key().public_key_hex(),
            fragment_length = config.fragment_length,
            "prekey server initialised"
        );
        Ok(Self {
            state,
            handler: Arc::new(PrekeyMessageHandler),
            fragments: FragmentStore::new(),
            fragment_length: config.fragment_length,
            session_timeout: config.session_timeout(),
            fragmentation_timeout: config.fragmentation_timeout(),
        })
    }

    /// Replace the protocol handler.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn fragments(&self) -> &FragmentStore {
        &self.fragments
    }

    /// Handle one raw message from `from` and return the encoded replies.
    ///
    /// A fragment that does not yet complete its message yields no replies.
    pub fn handle(&self, from: &str, raw: &str) -> Result<Vec<String>, ServerError> {
        if raw.is_empty() {
            return Err(ServerError::EmptyMessage);
        }

        let complete = if fragment::is_fragment(raw) {
            match self.fragments.receive(from, raw, Instant::now())? {
                Some(complete) => complete,
                None => return Ok(Vec::new()),
            }
        } else {
            raw.to_string()
        };

        let message = envelope::decode(&complete)?;
        let reply = self.handler.handle_message(&self.state, from, &message)?;
        let encoded = envelope::encode(&reply);
        let identifier = self.state.random_u32();
        Ok(fragment::fragment_message(encoded, self.fragment_length, identifier)?)
    }

    /// Expire idle sessions and stale fragment contexts.
    pub fn cleanup_after(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        let sessions = self.state.sessions().sweep(self.session_timeout, now);
        let fragments = self.fragments.sweep(self.fragmentation_timeout, now);
        tracing::debug!(sessions, fragments, "sweep finished");
    }
}
