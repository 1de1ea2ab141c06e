//! Per-chat ephemeral message lifetimes.
//!
//! Once a chat is seen with disappearing messages turned on, every later
//! message the bot sends there carries the same expiration, including sends
//! that are not replies to an inbound message.

use std::path::Path;

use tracing::{debug, warn};

use crate::store::KeyValueStore;

/// File name of the cache inside the data directory.
pub const EXPIRATIONS_FILE: &str = "expirations.json";

/// Chat id → expiration seconds, persisted on every change.
#[derive(Debug)]
pub struct ExpirationCache {
    store: KeyValueStore,
}

impl ExpirationCache {
    /// Opens `<data_dir>/expirations.json` with autosave enabled.
    pub fn open(data_dir: &Path) -> Self {
        Self::from_store(KeyValueStore::open(data_dir.join(EXPIRATIONS_FILE), true))
    }

    pub fn from_store(store: KeyValueStore) -> Self {
        Self { store }
    }

    /// Records the lifetime for `chat`. Zero is ignored.
    ///
    /// Returns whether the cached value changed.
    pub async fn remember(&self, chat: &str, seconds: u32) -> bool {
        if seconds == 0 || chat.is_empty() || self.get(chat) == Some(seconds) {
            return false;
        }
        debug!(chat, seconds, "Caching chat expiration");
        if let Err(e) = self.store.set_async(chat, seconds).await {
            warn!(chat, error = %e, "Failed to persist chat expiration");
        }
        true
    }

    /// Cached lifetime for `chat`.
    pub fn get(&self, chat: &str) -> Option<u32> {
        self.store.get::<u32>(chat).filter(|s| *s > 0)
    }

    /// Drops the cached value for `chat`.
    pub async fn forget(&self, chat: &str) {
        if let Err(e) = self.store.delete_async(chat).await {
            warn!(chat, error = %e, "Failed to persist chat expiration removal");
        }
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }
}
