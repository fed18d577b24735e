// src/storage/nonce_store.rs
//! TTL'd, single-use key/value cache.
//!
//! Backs transaction codes, short-lived code aliases and proof nonces.
//! Presence of a key is what makes a code valid, so every validation path
//! uses [`NonceStore::take`], which removes the entry in the same critical
//! section that reads it.
//!
//! Expired and never-existing keys are indistinguishable to callers: both
//! read as `None`.

use crate::utils::crypto::random_token;
use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Stores `value` under `key` for the store's TTL and returns the key.
    /// An empty key is replaced by a fresh random token.
    async fn add(&self, key: &str, value: &str) -> String;

    /// Reads a live entry.
    async fn get(&self, key: &str) -> Option<String>;

    /// Reads and removes a live entry atomically.
    async fn take(&self, key: &str) -> Option<String>;

    /// Removes an entry; removing an absent key is not an error.
    async fn delete(&self, key: &str);

    /// TTL applied to new entries.
    fn expiry_seconds(&self) -> u64;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local [`NonceStore`] with lazy expiry and an optional janitor.
pub struct InMemoryNonceStore {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryNonceStore {
    /// Creates an empty store whose entries live for `ttl`.
    ///
    /// `name` only shows up in log lines.
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Spawns a background task purging expired entries every `interval`.
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    debug!("{}: purged {} expired entries", store.name, purged);
                }
            }
        })
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn add(&self, key: &str, value: &str) -> String {
        let key = if key.is_empty() {
            random_token()
        } else {
            key.to_string()
        };
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().await.insert(key.clone(), entry);
        key
    }

    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn take(&self, key: &str) -> Option<String> {
        let entry = self.entries.lock().await.remove(key)?;
        (entry.expires_at > Instant::now()).then_some(entry.value)
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    fn expiry_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }
}
