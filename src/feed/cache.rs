use crate::clock::Clock;
use crate::session::{page_key, SessionStore, StoreError, FEED_CACHE_NAMESPACE};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live for cached pages (30 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Bound for feed entries. The engine only moves them around; their
/// contents are opaque to it.
pub trait FeedItem: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> FeedItem for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Immutable capture of one feed page at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedPageSnapshot<T> {
    page_index: u32,
    items: Vec<T>,
    total_count: u64,
    fetched_at: DateTime<Utc>,
}

impl<T> FeedPageSnapshot<T> {
    pub fn new(page_index: u32, items: Vec<T>, total_count: u64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            page_index,
            items,
            total_count,
            fetched_at,
        }
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Page-keyed snapshot cache with a time-to-live.
///
/// Snapshots live in the session store under `feed-cache:<page>`. Entries
/// are replaced by newer fetches and removed only by [`evict_if_stale`];
/// pages that are never revisited stay for the whole session.
///
/// [`evict_if_stale`]: PagedFeedCache::evict_if_stale
pub struct PagedFeedCache<T> {
    store: SessionStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    _items: PhantomData<fn() -> T>,
}

impl<T: FeedItem> PagedFeedCache<T> {
    pub fn new(store: SessionStore, clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(store, clock, DEFAULT_TTL)
    }

    pub fn with_ttl(store: SessionStore, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            _items: PhantomData,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn get(&self, page: u32) -> Option<FeedPageSnapshot<T>> {
        if page == 0 {
            return None;
        }
        self.store.get_json(&page_key(FEED_CACHE_NAMESPACE, page))
    }

    /// Store `snapshot`, replacing any snapshot for the same page.
    pub fn put(&self, snapshot: &FeedPageSnapshot<T>) -> Result<(), StoreError> {
        self.store
            .set_json(&page_key(FEED_CACHE_NAMESPACE, snapshot.page_index), snapshot)
    }

    /// A snapshot is fresh while its age is below the TTL.
    ///
    /// A timestamp ahead of the clock (wall-clock adjustment) counts as age 0.
    pub fn is_fresh(&self, snapshot: &FeedPageSnapshot<T>) -> bool {
        match (self.clock.now() - snapshot.fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            Err(_) => true,
        }
    }

    /// Remove the snapshot for `page` if its age has reached the TTL.
    ///
    /// Returns `true` if a stale snapshot was removed.
    pub fn evict_if_stale(&self, page: u32) -> bool {
        match self.get(page) {
            Some(snapshot) if !self.is_fresh(&snapshot) => {
                self.store.remove(&page_key(FEED_CACHE_NAMESPACE, page));
                tracing::debug!(page, fetched_at = %snapshot.fetched_at, "Evicted stale page snapshot");
                true
            }
            _ => false,
        }
    }

    /// Page indexes that currently have a snapshot, ascending.
    pub fn cached_pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .store
            .keys_in(FEED_CACHE_NAMESPACE)
            .iter()
            .filter_map(|key| key.rsplit(':').next()?.parse().ok())
            .collect();
        pages.sort_unstable();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn cache() -> (PagedFeedCache<String>, ManualClock) {
        let clock = ManualClock::new(start());
        let cache = PagedFeedCache::new(SessionStore::new(), Arc::new(clock.clone()));
        (cache, clock)
    }

    fn snapshot(page: u32, fetched_at: DateTime<Utc>) -> FeedPageSnapshot<String> {
        FeedPageSnapshot::new(page, vec![format!("post-{page}")], 120, fetched_at)
    }

    #[test]
    fn test_get_missing_page() {
        let (cache, _) = cache();
        assert!(cache.get(1).is_none());
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn test_put_replaces_snapshot() {
        let (cache, clock) = cache();
        cache.put(&snapshot(1, start())).unwrap();

        clock.advance(chrono::Duration::minutes(5));
        let newer = FeedPageSnapshot::new(1, vec!["fresh".to_string()], 121, clock.now());
        cache.put(&newer).unwrap();

        assert_eq!(cache.get(1), Some(newer));
    }

    #[test]
    fn test_fresh_until_ttl() {
        let (cache, clock) = cache();
        let snap = snapshot(1, start());

        clock.advance(chrono::Duration::minutes(29));
        assert!(cache.is_fresh(&snap));

        clock.advance(chrono::Duration::minutes(1));
        assert!(!cache.is_fresh(&snap), "age equal to the TTL is stale");
    }

    #[test]
    fn test_future_timestamp_counts_as_fresh() {
        let (cache, _) = cache();
        let snap = snapshot(1, start() + chrono::Duration::minutes(3));
        assert!(cache.is_fresh(&snap));
    }

    #[test]
    fn test_evict_if_stale_keeps_fresh_entry() {
        let (cache, clock) = cache();
        cache.put(&snapshot(1, start())).unwrap();

        clock.advance(chrono::Duration::minutes(10));
        assert!(!cache.evict_if_stale(1));
        assert!(cache.get(1).is_some());

        clock.advance(chrono::Duration::minutes(21));
        assert!(cache.evict_if_stale(1));
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_cached_pages_listing() {
        let (cache, _) = cache();
        for page in [3, 1, 12] {
            cache.put(&snapshot(page, start())).unwrap();
        }
        assert_eq!(cache.cached_pages(), vec![1, 3, 12]);
    }

    #[test]
    fn test_custom_ttl() {
        let clock = ManualClock::new(start());
        let cache: PagedFeedCache<String> = PagedFeedCache::with_ttl(
            SessionStore::new(),
            Arc::new(clock.clone()),
            Duration::from_secs(60),
        );
        let snap = snapshot(1, start());
        clock.advance(chrono::Duration::seconds(61));
        assert!(!cache.is_fresh(&snap));
    }

    proptest! {
        #[test]
        fn prop_fresh_iff_age_below_ttl(age_secs in 0i64..(4 * 3600)) {
            let (cache, clock) = cache();
            let snap = snapshot(1, start());
            clock.advance(chrono::Duration::seconds(age_secs));
            prop_assert_eq!(cache.is_fresh(&snap), age_secs < 30 * 60);
        }
    }
}
