//! In-process store implementations.
//!
//! Each store is a [`DashMap`] with per-entry expiry. Consuming operations use
//! the map's entry locks (`remove_if`, `entry`) so the check and the removal
//! happen under one shard lock. Expired entries are ignored on read and
//! dropped by `purge_expired`, which every store also runs on its own once
//! every [`PURGE_EVERY`] writes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::CacheResult;
use crate::provider::{ArtifactStore, OneTimeUseCache, ReplayScope, ReplayStore};

/// Writes between automatic sweeps of expired entries.
pub const PURGE_EVERY: usize = 256;

#[derive(Debug, Default)]
struct WriteCounter(AtomicUsize);

impl WriteCounter {
    /// Counts a write; true when a sweep is due.
    fn tick(&self) -> bool {
        self.0.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1
    }
}

#[derive(Debug, Clone)]
struct Pending {
    request_id: String,
    expires_at: Instant,
}

/// In-memory [`ReplayStore`].
#[derive(Debug, Default)]
pub struct MemoryReplayStore {
    sessions: DashMap<String, Pending>,
    process: DashMap<String, Instant>,
    writes: WriteCounter,
}

impl MemoryReplayStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired records, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len() + self.process.len();
        self.sessions.retain(|_, p| p.expires_at > now);
        self.process.retain(|_, exp| *exp > now);
        let removed = before - (self.sessions.len() + self.process.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired pending requests");
        }
        removed
    }

    /// Number of pending requests held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len() + self.process.len()
    }

    /// Returns true if no pending requests are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn record_request(&self, scope: &ReplayScope, request_id: &str, ttl: Duration) -> CacheResult<()> {
        let expires_at = Instant::now() + ttl;
        match scope {
            ReplayScope::Session(session) => {
                self.sessions.insert(
                    session.clone(),
                    Pending {
                        request_id: request_id.to_string(),
                        expires_at,
                    },
                );
            }
            ReplayScope::Process => {
                self.process.insert(request_id.to_string(), expires_at);
            }
        }
        tracing::debug!(scope = %scope, request_id, "Recorded pending request");
        if self.writes.tick() {
            self.purge_expired();
        }
        Ok(())
    }

    async fn consume(&self, scope: &ReplayScope, in_response_to: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let consumed = match scope {
            ReplayScope::Session(session) => self
                .sessions
                .remove_if(session, |_, p| p.request_id == in_response_to && p.expires_at > now)
                .is_some(),
            ReplayScope::Process => self
                .process
                .remove_if(in_response_to, |_, exp| *exp > now)
                .is_some(),
        };
        if consumed {
            tracing::info!(scope = %scope, in_response_to, "Pending request consumed");
        }
        Ok(consumed)
    }

    async fn pending(&self, scope: &ReplayScope) -> CacheResult<Option<String>> {
        let ReplayScope::Session(session) = scope else {
            return Ok(None);
        };
        let now = Instant::now();
        Ok(self
            .sessions
            .get(session)
            .filter(|p| p.expires_at > now)
            .map(|p| p.request_id.clone()))
    }

    async fn discard(&self, scope: &ReplayScope) -> CacheResult<()> {
        if let ReplayScope::Session(session) = scope {
            self.sessions.remove(session);
        }
        Ok(())
    }
}

/// In-memory [`OneTimeUseCache`].
#[derive(Debug, Default)]
pub struct MemoryOneTimeUseCache {
    entries: DashMap<String, Instant>,
    writes: WriteCounter,
}

impl MemoryOneTimeUseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired ids, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, exp| *exp > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired one-time-use ids");
        }
        removed
    }

    /// Number of ids held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no ids are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl OneTimeUseCache for MemoryOneTimeUseCache {
    async fn insert_if_absent(&self, id: &str, ttl: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        let inserted = match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut e) => {
                if *e.get() > now {
                    false
                } else {
                    e.insert(now + ttl);
                    true
                }
            }
            Entry::Vacant(e) => {
                e.insert(now + ttl);
                true
            }
        };
        if inserted && self.writes.tick() {
            self.purge_expired();
        }
        Ok(inserted)
    }

    async fn contains(&self, id: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self.entries.get(id).is_some_and(|exp| *exp > now))
    }
}

/// In-memory [`ArtifactStore`].
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    messages: DashMap<String, (String, Instant)>,
    writes: WriteCounter,
}

impl MemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired messages, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.messages.len();
        self.messages.retain(|_, (_, exp)| *exp > now);
        let removed = before - self.messages.len();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired artifacts");
        }
        removed
    }

    /// Number of messages held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if no messages are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn store(&self, handle: &str, message: String, ttl: Duration) -> CacheResult<()> {
        self.messages
            .insert(handle.to_string(), (message, Instant::now() + ttl));
        if self.writes.tick() {
            self.purge_expired();
        }
        Ok(())
    }

    async fn take(&self, handle: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        Ok(self
            .messages
            .remove(handle)
            .and_then(|(_, (msg, exp))| (exp > now).then_some(msg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn session_consume_once() {
        let store = MemoryReplayStore::new();
        let scope = ReplayScope::session("s1");
        store.record_request(&scope, "id1", TTL).await.unwrap();

        assert_eq!(store.pending(&scope).await.unwrap().as_deref(), Some("id1"));
        assert!(!store.consume(&scope, "other").await.unwrap());
        assert!(store.consume(&scope, "id1").await.unwrap());
        assert!(!store.consume(&scope, "id1").await.unwrap());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = MemoryReplayStore::new();
        store.record_request(&ReplayScope::session("a"), "id1", TTL).await.unwrap();
        assert!(!store.consume(&ReplayScope::session("b"), "id1").await.unwrap());
        assert!(!store.consume(&ReplayScope::Process, "id1").await.unwrap());
    }

    #[tokio::test]
    async fn new_request_replaces_session_pending() {
        let store = MemoryReplayStore::new();
        let scope = ReplayScope::session("s1");
        store.record_request(&scope, "id1", TTL).await.unwrap();
        store.record_request(&scope, "id2", TTL).await.unwrap();
        assert!(!store.consume(&scope, "id1").await.unwrap());
        assert!(store.consume(&scope, "id2").await.unwrap());
    }

    #[tokio::test]
    async fn process_scope_holds_many() {
        let store = MemoryReplayStore::new();
        store.record_request(&ReplayScope::Process, "id1", TTL).await.unwrap();
        store.record_request(&ReplayScope::Process, "id2", TTL).await.unwrap();
        assert!(store.consume(&ReplayScope::Process, "id2").await.unwrap());
        assert!(store.consume(&ReplayScope::Process, "id1").await.unwrap());
    }

    #[tokio::test]
    async fn expired_request_not_consumable() {
        let store = MemoryReplayStore::new();
        store
            .record_request(&ReplayScope::Process, "id1", Duration::ZERO)
            .await
            .unwrap();
        assert!(!store.consume(&ReplayScope::Process, "id1").await.unwrap());
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn discard_drops_pending() {
        let store = MemoryReplayStore::new();
        let scope = ReplayScope::session("s1");
        store.record_request(&scope, "id1", TTL).await.unwrap();
        store.discard(&scope).await.unwrap();
        assert_eq!(store.pending(&scope).await.unwrap(), None);
        assert!(!store.consume(&scope, "id1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_consume_has_one_winner() {
        let store = Arc::new(MemoryReplayStore::new());
        let scope = ReplayScope::session("s1");
        store.record_request(&scope, "id1", TTL).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let scope = scope.clone();
            handles.push(tokio::spawn(async move { store.consume(&scope, "id1").await.unwrap() }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn one_time_use_rejects_duplicate() {
        let cache = MemoryOneTimeUseCache::new();
        assert!(cache.insert_if_absent("a1", TTL).await.unwrap());
        assert!(!cache.insert_if_absent("a1", TTL).await.unwrap());
        assert!(cache.contains("a1").await.unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn one_time_use_expired_id_reusable() {
        let cache = MemoryOneTimeUseCache::new();
        assert!(cache.insert_if_absent("a1", Duration::ZERO).await.unwrap());
        assert!(!cache.contains("a1").await.unwrap());
        assert!(cache.insert_if_absent("a1", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn artifact_take_is_single_use() {
        let store = MemoryArtifactStore::new();
        store.store("h1", "<msg/>".to_string(), TTL).await.unwrap();
        assert_eq!(store.take("h1").await.unwrap().as_deref(), Some("<msg/>"));
        assert_eq!(store.take("h1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_write() {
        let replay = MemoryReplayStore::new();
        let cache = MemoryOneTimeUseCache::new();
        let artifacts = MemoryArtifactStore::new();
        for i in 0..PURGE_EVERY {
            let id = format!("id{i}");
            replay.record_request(&ReplayScope::Process, &id, Duration::ZERO).await.unwrap();
            assert!(cache.insert_if_absent(&id, Duration::ZERO).await.unwrap());
            artifacts.store(&id, "<msg/>".to_string(), Duration::ZERO).await.unwrap();
        }
        assert!(replay.is_empty());
        assert!(cache.is_empty());
        assert!(artifacts.is_empty());

        replay.record_request(&ReplayScope::Process, "live", TTL).await.unwrap();
        assert!(cache.insert_if_absent("live", TTL).await.unwrap());
        assert_eq!(replay.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn artifact_expired_not_returned() {
        let store = MemoryArtifactStore::new();
        store.store("h1", "<msg/>".to_string(), Duration::ZERO).await.unwrap();
        assert_eq!(store.take("h1").await.unwrap(), None);
    }
}
