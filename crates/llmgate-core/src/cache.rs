//! TTL response cache keyed by request fingerprint

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{ChatMessage, ResponseResult};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ResponseResult,
    expires_at: Instant,
}

/// Compute the cache key for a request.
///
/// Whitespace inside message contents is collapsed and the provider is left
/// out, so the same question asked of the same model hits the same entry no
/// matter which vendor served it.
pub fn fingerprint(
    model: &str,
    messages: &[ChatMessage],
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    locale: Option<&str>,
) -> String {
    let mut hasher = DefaultHasher::new();
    model.trim().hash(&mut hasher);
    messages.len().hash(&mut hasher);
    for message in messages {
        message.role.hash(&mut hasher);
        for word in message.content.split_whitespace() {
            word.hash(&mut hasher);
        }
        // terminate each message so word boundaries cannot shift across turns
        0xffu8.hash(&mut hasher);
    }
    temperature.map(f32::to_bits).hash(&mut hasher);
    max_tokens.hash(&mut hasher);
    locale.map(str::to_lowercase).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Response cache shared by every provider.
///
/// Entries are never served past `expires_at`; expired entries are removed
/// when they are next read or by [`ResponseCache::purge_expired`].
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry; the returned value has `cached = true`
    pub fn get(&self, key: &str) -> Option<ResponseResult> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));

        match hit {
            Some((true, mut value)) => {
                debug!(key = key, "Cache hit");
                value.cached = true;
                value.latency_ms = 0;
                value.attempts = 0;
                Some(value)
            }
            Some((false, _)) => {
                // re-check under the shard lock so a fresh concurrent set survives
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                debug!(key = key, "Cache entry expired");
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: ResponseResult, ttl: Duration) {
        let key = key.into();
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Caching response");
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
