//! Bounded, time-windowed response cache for repeated searches.
//!
//! External callers tend to poll with the same request over and over.
//! The cache keeps a handful of recent responses and serves them back
//! while they are younger than the caller's freshness window, bounded by
//! a hard 24h ceiling.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::searcher::{AggregatedResult, MetaSearcher, SearchRequest};

/// How many responses are kept at once.
pub const MAX_CACHE_SIZE: usize = 5;

/// Hard ceiling on entry age. Age-based eviction always wins over the
/// caller's freshness window.
pub const MAX_CACHE_AGE_HOURS: i64 = 24;

/// The search execution the cache sits in front of.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(&self, request: SearchRequest) -> AggregatedResult;
}

#[async_trait]
impl Searcher for MetaSearcher {
    async fn search(&self, request: SearchRequest) -> AggregatedResult {
        MetaSearcher::search(self, request).await
    }
}

/// Deterministic digest of a request's query-affecting fields. Paging
/// and cache-control knobs are left out: they steer how a response is
/// served, not what is searched.
pub fn fingerprint(request: &SearchRequest) -> u64 {
    let mut hasher = Sha256::new();
    let mut feed = |tag: &str, value: &str| {
        hasher.update(tag.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    };

    feed("kind", &format!("{:?}", request.kind));
    if let Some(query) = &request.query {
        feed("query", query);
    }
    if let Some(category) = &request.category {
        feed("category", category);
    }
    let mut ids: Vec<_> = request.identifiers.iter().collect();
    ids.sort_by_key(|(t, _)| **t);
    for (id_type, value) in ids {
        feed(&format!("id:{id_type:?}"), value);
    }
    if let Some(season) = request.season {
        feed("season", &season.to_string());
    }
    if let Some(episode) = &request.episode {
        feed("episode", episode);
    }
    if let Some(title) = &request.title {
        feed("title", title);
    }
    if let Some(author) = &request.author {
        feed("author", author);
    }
    if let Some(min_age) = request.min_age_days {
        feed("min_age", &min_age.to_string());
    }
    if let Some(max_age) = request.max_age_days {
        feed("max_age", &max_age.to_string());
    }
    if let Some(min_size) = request.min_size_mb {
        feed("min_size", &min_size.to_string());
    }
    if let Some(max_size) = request.max_size_mb {
        feed("max_size", &max_size.to_string());
    }
    if let Some(backends) = &request.backends {
        let mut backends = backends.clone();
        backends.sort();
        feed("backends", &backends.join(","));
    }

    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

struct CacheEntry {
    last_update: DateTime<Utc>,
    response: Arc<AggregatedResult>,
}

/// Serves cached responses for repeated requests, delegating to the
/// wrapped searcher on miss. The table is touched under one lock; the
/// search itself runs outside it so concurrent distinct requests don't
/// serialize on each other.
pub struct CachedSearcher {
    inner: Arc<dyn Searcher>,
    entries: Mutex<HashMap<u64, CacheEntry>>,
}

impl CachedSearcher {
    pub fn new(inner: Arc<dyn Searcher>) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return a response no older than `refresh_window_minutes` for this
    /// request, searching anew when the cache can't provide one.
    pub async fn search(
        &self,
        request: SearchRequest,
        refresh_window_minutes: i64,
    ) -> Arc<AggregatedResult> {
        let key = fingerprint(&request);
        let now = Utc::now();

        {
            let mut entries = self.entries.lock().await;
            // Entries past the hard age ceiling go first, regardless of
            // what window the caller asked for.
            entries
                .retain(|_, entry| now - entry.last_update < Duration::hours(MAX_CACHE_AGE_HOURS));

            if let Some(entry) = entries.get(&key) {
                if now - entry.last_update < Duration::minutes(refresh_window_minutes) {
                    debug!(key, age_secs = (now - entry.last_update).num_seconds(), "cache hit");
                    return entry.response.clone();
                }
                debug!(key, "cache entry outside the requested window");
            }
        }

        info!(key, search = %request.id, "cache miss, searching");
        let response = Arc::new(self.inner.search(request).await);

        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&key) && entries.len() >= MAX_CACHE_SIZE {
            // Deterministic tie break on the key keeps eviction stable.
            let oldest = entries
                .iter()
                .min_by_key(|(k, entry)| (entry.last_update, **k))
                .map(|(k, _)| *k);
            if let Some(oldest) = oldest {
                debug!(key = oldest, "evicting oldest cache entry");
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                last_update: Utc::now(),
                response: response.clone(),
            },
        );
        response
    }

    /// Number of live cached responses.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::{SearchKind, SearchSource};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSearcher {
        calls: AtomicU32,
    }

    impl CountingSearcher {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Searcher for CountingSearcher {
        async fn search(&self, _request: SearchRequest) -> AggregatedResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            AggregatedResult {
                items: Vec::new(),
                total_available: call,
                rejected: 0,
                outcomes: Vec::new(),
                duration_ms: 0,
            }
        }
    }

    fn cached() -> (CachedSearcher, Arc<CountingSearcher>) {
        let inner = Arc::new(CountingSearcher::new());
        (CachedSearcher::new(inner.clone()), inner)
    }

    fn request(query: &str) -> SearchRequest {
        let mut request = SearchRequest::new(SearchKind::General, SearchSource::Api);
        request.query = Some(query.to_string());
        request
    }

    #[test]
    fn test_fingerprint_ignores_paging_and_request_id() {
        let mut a = request("q");
        let mut b = request("q");
        a.offset = 0;
        a.limit = 50;
        b.offset = 100;
        b.limit = 200;
        // Different uuids too, since each request gets a fresh one.
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_covers_query_fields() {
        let base = fingerprint(&request("q"));
        assert_ne!(base, fingerprint(&request("other")));

        let mut with_season = request("q");
        with_season.season = Some(2);
        assert_ne!(base, fingerprint(&with_season));

        let mut with_backends = request("q");
        with_backends.backends = Some(vec!["alpha".to_string()]);
        assert_ne!(base, fingerprint(&with_backends));
    }

    #[test]
    fn test_fingerprint_backend_order_is_irrelevant() {
        let mut a = request("q");
        a.backends = Some(vec!["alpha".to_string(), "beta".to_string()]);
        let mut b = request("q");
        b.backends = Some(vec!["beta".to_string(), "alpha".to_string()]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn test_repeated_request_is_served_from_cache() {
        let (cached, inner) = cached();
        let first = cached.search(request("q"), 60).await;
        let second = cached.search(request("q"), 60).await;
        assert_eq!(inner.calls(), 1);
        assert_eq!(first.total_available, second.total_available);
    }

    #[tokio::test]
    async fn test_zero_window_always_refreshes() {
        let (cached, inner) = cached();
        cached.search(request("q"), 0).await;
        cached.search(request("q"), 0).await;
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_distinct_requests_are_cached_separately() {
        let (cached, inner) = cached();
        cached.search(request("a"), 60).await;
        cached.search(request("b"), 60).await;
        cached.search(request("a"), 60).await;
        cached.search(request("b"), 60).await;
        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.len().await, 2);
    }

    #[tokio::test]
    async fn test_sixth_fingerprint_evicts_the_oldest() {
        let (cached, inner) = cached();
        for i in 0..5 {
            cached.search(request(&format!("q{i}")), 60).await;
        }
        assert_eq!(cached.len().await, 5);

        // "q0" is the oldest entry and gets evicted for "q5".
        cached.search(request("q5"), 60).await;
        assert_eq!(cached.len().await, 5);
        assert_eq!(inner.calls(), 6);

        // "q1" is still cached; "q0" has to be searched again.
        cached.search(request("q1"), 60).await;
        assert_eq!(inner.calls(), 6);
        cached.search(request("q0"), 60).await;
        assert_eq!(inner.calls(), 7);
    }

    #[tokio::test]
    async fn test_entry_past_age_ceiling_is_dropped() {
        let (cached, inner) = cached();
        cached.search(request("q"), 60).await;

        // Backdate the entry past the 24h ceiling.
        {
            let mut entries = cached.entries.lock().await;
            for entry in entries.values_mut() {
                entry.last_update = Utc::now() - Duration::hours(25);
            }
        }

        // A huge window can't resurrect it.
        cached.search(request("q"), 60 * 24 * 30).await;
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_within_ceiling_respects_window() {
        let (cached, inner) = cached();
        cached.search(request("q"), 60).await;

        {
            let mut entries = cached.entries.lock().await;
            for entry in entries.values_mut() {
                entry.last_update = Utc::now() - Duration::hours(2);
            }
        }

        // Two hours old: fresh enough for a 3h window, too old for 1h.
        cached.search(request("q"), 180).await;
        assert_eq!(inner.calls(), 1);
        cached.search(request("q"), 60).await;
        assert_eq!(inner.calls(), 2);
    }
}
