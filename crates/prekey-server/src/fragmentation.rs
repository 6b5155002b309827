//! Inbound fragment contexts, keyed by sender identity and fragment id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prekey_protocol::{Fragment, ProtocolError, Reassembly};

#[derive(Debug)]
struct FragmentContext {
    reassembly: Reassembly,
    last_touched: Instant,
}

#[derive(Debug, Default)]
pub struct FragmentStore {
    contexts: Mutex<HashMap<String, FragmentContext>>,
}

fn context_key(identity: &str, identifier: u32) -> String {
    format!("{identity}/{identifier}")
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns the reassembled envelope once every
    /// piece has arrived and `None` while pieces are still missing.
    pub fn receive(
        &self,
        identity: &str,
        text: &str,
        now: Instant,
    ) -> Result<Option<String>, ProtocolError> {
        let fragment = Fragment::parse(text)?;
        let key = context_key(identity, fragment.identifier);

        let mut contexts = self.contexts.lock();
        let context = contexts.entry(key.clone()).or_insert_with(|| FragmentContext {
            reassembly: Reassembly::new(),
            last_touched: now,
        });
        context.reassembly.add(fragment)?;
        context.last_touched = now;

        match context.reassembly.assemble() {
            Some(complete) => {
                contexts.remove(&key);
                tracing::debug!(identity = %identity, "fragmented message reassembled");
                Ok(Some(complete))
            }
            None => Ok(None),
        }
    }

    /// Remove every context idle for strictly longer than `timeout`.
    pub fn sweep(&self, timeout: Duration, now: Instant) -> usize {
        let mut contexts = self.contexts.lock();
        let before = contexts.len();
        contexts
            .retain(|_, context| now.saturating_duration_since(context.last_touched) <= timeout);
        let removed = before - contexts.len();
        if removed > 0 {
            tracing::debug!(removed, "stale fragment contexts dropped");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}
