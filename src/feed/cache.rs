// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::SharedClock;
use crate::error::StoreError;
use crate::store::StoreHandle;

/// Default time a fetched feed document is served without refetching
pub const DEFAULT_TTL: Duration = Duration::seconds(60);

#[derive(Debug, Clone)]
struct CachedFeed {
    content: Bytes,
    fetched_at: DateTime<Utc>,
}

/// Read-through cache for the feed document
///
/// Content younger than the TTL is served from memory. Older content, or no
/// content at all, triggers a synchronous fetch from the store. Readers share
/// a read lock; a refill or [`invalidate`](Self::invalidate) takes the write
/// lock, so a reader only ever sees a complete document. Concurrent readers
/// that find the cache stale wait for the one refill in progress.
pub struct FeedCache {
    store: StoreHandle,
    key: String,
    ttl: Duration,
    clock: SharedClock,
    state: RwLock<Option<CachedFeed>>,
}

impl FeedCache {
    pub fn new(store: StoreHandle, key: impl Into<String>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            store,
            key: key.into(),
            ttl,
            clock,
            state: RwLock::new(None),
        }
    }

    /// Key of the cached object
    pub fn key(&self) -> &str {
        &self.key
    }

    fn fresh_content(&self, cached: Option<&CachedFeed>) -> Option<Bytes> {
        let cached = cached?;
        let age = self.clock.now() - cached.fetched_at;
        (age < self.ttl).then(|| cached.content.clone())
    }

    /// Get the feed document, fetching it from the store if stale
    pub async fn read(&self) -> Result<Bytes, StoreError> {
        if let Some(content) = self.fresh_content(self.state.read().await.as_ref()) {
            return Ok(content);
        }

        let mut state = self.state.write().await;
        // Another reader may have refilled while we waited for the lock
        if let Some(content) = self.fresh_content(state.as_ref()) {
            return Ok(content);
        }

        let content = self.store.read(&self.key).await?;
        debug!(key = %self.key, bytes = content.len(), "Refilled feed cache");

        *state = Some(CachedFeed {
            content: content.clone(),
            fetched_at: self.clock.now(),
        });
        Ok(content)
    }

    /// Drop the cached document so the next read goes to the store
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
        debug!(key = %self.key, "Invalidated feed cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, ObjectStore, Operation};
    use std::sync::Arc;

    fn setup(document: &'static [u8]) -> (Arc<MemoryStore>, Arc<ManualClock>, FeedCache) {
        let store = Arc::new(MemoryStore::with_objects([("index.xml", document)]));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = FeedCache::new(store.clone(), "index.xml", DEFAULT_TTL, clock.clone());
        (store, clock, cache)
    }

    #[tokio::test]
    async fn reads_within_ttl_fetch_once() {
        let (store, clock, cache) = setup(b"<rss>v1</rss>");

        assert_eq!(cache.read().await.unwrap(), Bytes::from_static(b"<rss>v1</rss>"));
        clock.advance(Duration::seconds(59));
        assert_eq!(cache.read().await.unwrap(), Bytes::from_static(b"<rss>v1</rss>"));

        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn content_is_served_unchanged_within_ttl() {
        let (store, clock, cache) = setup(b"v1");

        cache.read().await.unwrap();
        store
            .write("index.xml", Bytes::from_static(b"v2"), "text/xml")
            .await
            .unwrap();
        clock.advance(Duration::seconds(30));

        assert_eq!(cache.read().await.unwrap(), Bytes::from_static(b"v1"));
    }

    #[tokio::test]
    async fn read_after_ttl_refetches() {
        let (store, clock, cache) = setup(b"v1");

        cache.read().await.unwrap();
        store
            .write("index.xml", Bytes::from_static(b"v2"), "text/xml")
            .await
            .unwrap();
        clock.advance(Duration::seconds(60));

        assert_eq!(cache.read().await.unwrap(), Bytes::from_static(b"v2"));
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch_within_ttl() {
        let (store, _clock, cache) = setup(b"v1");

        cache.read().await.unwrap();
        cache.invalidate().await;
        cache.read().await.unwrap();

        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn failed_refill_leaves_cache_empty() {
        let (store, _clock, cache) = setup(b"v1");
        store.fail(Operation::Read, "index.xml");

        assert!(cache.read().await.is_err());
        assert_eq!(store.read_count(), 0);

        store.heal(Operation::Read, "index.xml");
        assert_eq!(cache.read().await.unwrap(), Bytes::from_static(b"v1"));
        cache.read().await.unwrap();
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn missing_document_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = FeedCache::new(store, "index.xml", DEFAULT_TTL, clock);

        assert!(cache.read().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn concurrent_readers_share_one_refill() {
        let (store, _clock, cache) = setup(b"v1");
        let cache = Arc::new(cache);

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.read().await })
            })
            .collect();

        for reader in readers {
            assert_eq!(reader.await.unwrap().unwrap(), Bytes::from_static(b"v1"));
        }
        assert_eq!(store.read_count(), 1);
    }
}
