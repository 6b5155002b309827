//! Prekey storage contract and the in-memory backend.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;
use prekey_protocol::{ClientProfile, PrekeyEnsemble, PrekeyMessage, PrekeyProfile};

use crate::error::ServerError;

/// Backing store for published prekey material.
///
/// Everything is keyed by the publishing identity and then by the
/// instance tag carried inside each profile or message.
pub trait Storage: Send + Sync {
    /// Replace the client profile for the profile's instance tag.
    fn store_client_profile(
        &self,
        identity: &str,
        profile: ClientProfile,
    ) -> Result<(), ServerError>;

    /// Replace the prekey profile for the profile's instance tag.
    fn store_prekey_profile(
        &self,
        identity: &str,
        profile: PrekeyProfile,
    ) -> Result<(), ServerError>;

    /// Append prekey messages; they are handed out oldest first.
    fn store_prekey_messages(
        &self,
        identity: &str,
        messages: Vec<PrekeyMessage>,
    ) -> Result<(), ServerError>;

    /// Prekey messages still available for one instance.
    fn number_stored(&self, identity: &str, instance_tag: u32) -> Result<u32, ServerError>;

    /// One ensemble per complete, unexpired instance of `identity`. Each
    /// returned ensemble consumes its prekey message.
    fn retrieve_for(&self, identity: &str, now: u64) -> Result<Vec<PrekeyEnsemble>, ServerError>;
}

#[derive(Debug, Default)]
struct StoredInstance {
    client_profile: Option<ClientProfile>,
    prekey_profile: Option<PrekeyProfile>,
    prekey_messages: VecDeque<PrekeyMessage>,
}

impl StoredInstance {
    fn take_ensemble(&mut self, now: u64) -> Option<PrekeyEnsemble> {
        let client_profile = self.client_profile.as_ref().filter(|p| !p.is_expired(now))?;
        let prekey_profile = self.prekey_profile.as_ref().filter(|p| !p.is_expired(now))?;
        let client_profile = client_profile.clone();
        let prekey_profile = prekey_profile.clone();
        let prekey_message = self.prekey_messages.pop_front()?;
        Some(PrekeyEnsemble {
            client_profile,
            prekey_profile,
            prekey_message,
        })
    }
}

/// Storage that lives only as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    identities: Mutex<HashMap<String, BTreeMap<u32, StoredInstance>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_instance(
        &self,
        identity: &str,
        instance_tag: u32,
        f: impl FnOnce(&mut StoredInstance),
    ) {
        let mut identities = self.identities.lock();
        let instance = identities
            .entry(identity.to_string())
            .or_default()
            .entry(instance_tag)
            .or_default();
        f(instance);
    }
}

impl Storage for InMemoryStorage {
    fn store_client_profile(
        &self,
        identity: &str,
        profile: ClientProfile,
    ) -> Result<(), ServerError> {
        self.with_instance(identity, profile.instance_tag, |i| i.client_profile = Some(profile));
        Ok(())
    }

    fn store_prekey_profile(
        &self,
        identity: &str,
        profile: PrekeyProfile,
    ) -> Result<(), ServerError> {
        self.with_instance(identity, profile.instance_tag, |i| i.prekey_profile = Some(profile));
        Ok(())
    }

    fn store_prekey_messages(
        &self,
        identity: &str,
        messages: Vec<PrekeyMessage>,
    ) -> Result<(), ServerError> {
        for message in messages {
            self.with_instance(identity, message.instance_tag, |i| {
                i.prekey_messages.push_back(message);
            });
        }
        Ok(())
    }

    fn number_stored(&self, identity: &str, instance_tag: u32) -> Result<u32, ServerError> {
        let identities = self.identities.lock();
        let count = identities
            .get(identity)
            .and_then(|instances| instances.get(&instance_tag))
            .map_or(0, |instance| instance.prekey_messages.len());
        u32::try_from(count)
            .map_err(|_| ServerError::Storage(format!("{count} prekey messages stored")))
    }

    fn retrieve_for(&self, identity: &str, now: u64) -> Result<Vec<PrekeyEnsemble>, ServerError> {
        let mut identities = self.identities.lock();
        let Some(instances) = identities.get_mut(identity) else {
            return Ok(Vec::new());
        };
        Ok(instances
            .values_mut()
            .filter_map(|instance| instance.take_ensemble(now))
            .collect())
    }
}
