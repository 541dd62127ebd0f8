use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use super::config::SignatureCacheConfig;

/// Cache entry with timestamp for TTL
#[derive(Clone, Debug)]
struct CacheEntry {
    signature: String,
    created_at: Instant,
}

impl CacheEntry {
    fn new(signature: String) -> Self {
        Self {
            signature,
            created_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Session-scoped store of authentic thinking signatures.
///
/// Maps `(session_id, thinking text)` to the last authentic signature seen for
/// that text. The Gemini path writes here before replacing signatures with the
/// bypass sentinel; the Claude path reads from here to restore them when a
/// conversation switches model family mid-session.
///
/// Bounds:
/// 1. At most `max_sessions` sessions; the least recently used one is evicted.
/// 2. At most `max_entries_per_session` texts per session, LRU as well.
/// 3. Entries older than `ttl` are invisible to lookups.
pub struct SignatureCache {
    sessions: Mutex<LruCache<String, LruCache<String, CacheEntry>>>,
    per_session: NonZeroUsize,
    ttl: Duration,
}

fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

impl SignatureCache {
    pub fn new(config: &SignatureCacheConfig) -> Self {
        Self {
            sessions: Mutex::new(LruCache::new(non_zero(config.max_sessions))),
            per_session: non_zero(config.max_entries_per_session),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Thinking text can be many kilobytes; keep a fixed-size digest instead.
    fn text_key(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Store (or overwrite) the signature for a thinking text.
    pub fn store(&self, session_id: &str, text: &str, signature: &str) {
        if session_id.is_empty() || text.is_empty() || signature.is_empty() {
            return;
        }

        let key = Self::text_key(text);
        let mut sessions = self.sessions.lock();

        if sessions.get_mut(session_id).is_none() {
            if let Some((evicted, _)) =
                sessions.push(session_id.to_string(), LruCache::new(self.per_session))
            {
                tracing::debug!("[SignatureCache] Evicted least recent session: {}", evicted);
            }
        }

        if let Some(bucket) = sessions.get_mut(session_id) {
            bucket.put(key, CacheEntry::new(signature.to_string()));
            tracing::debug!(
                "[SignatureCache] Session {} -> stored signature (len={}, entries={})",
                session_id,
                signature.len(),
                bucket.len()
            );
        }
    }

    /// Look up the signature for a thinking text. Never removes the entry.
    pub fn lookup(&self, session_id: &str, text: &str) -> Option<String> {
        if session_id.is_empty() || text.is_empty() {
            return None;
        }

        let key = Self::text_key(text);
        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(session_id)?.get(&key)?;

        if entry.is_expired(self.ttl) {
            tracing::debug!("[SignatureCache] Session {} -> EXPIRED", session_id);
            return None;
        }

        tracing::debug!(
            "[SignatureCache] Session {} -> HIT (len={})",
            session_id,
            entry.signature.len()
        );
        Some(entry.signature.clone())
    }

    /// Number of texts currently held for a session (expired ones included).
    pub fn session_len(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .peek(session_id)
            .map(|bucket| bucket.len())
            .unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new(&SignatureCacheConfig::default())
    }
}
