//! Stable result identity and idempotent persistence.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::store::ResultStore;
use super::ResultItem;

/// Content-derived identity of a result. Two results with the same
/// backend, title, link and guid always hash to the same id, across
/// searches and across restarts. Field separators keep adjacent fields
/// from running into each other.
pub fn stable_id(backend: &str, title: &str, link: &str, guid: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(backend.as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(link.as_bytes());
    hasher.update([0x1f]);
    hasher.update(guid.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Attaches stable ids to result items and persists the ones not seen
/// before. Persistence is serialized per backend so concurrent searches
/// against the same backend can't race between the existence check and
/// the insert; different backends persist in parallel.
pub struct ResultPersister {
    store: Arc<dyn ResultStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn backend_lock(&self, backend: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(backend.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attach a stable id to every item and persist the new ones. Every
    /// item carries its id on return even when storage fails; a store
    /// failure costs durability, not search results, so it is logged and
    /// swallowed.
    pub async fn persist(&self, backend: &str, items: &mut [ResultItem]) {
        for item in items.iter_mut() {
            item.stable_id = Some(stable_id(
                &item.backend,
                &item.title,
                &item.link,
                &item.backend_guid,
            ));
        }
        if items.is_empty() {
            return;
        }

        let lock = self.backend_lock(backend).await;
        let _guard = lock.lock().await;

        let ids: Vec<u64> = items.iter().filter_map(|i| i.stable_id).collect();
        let existing = match self.store.find_existing_ids(&ids) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(backend = %backend, error = %e, "failed to check for known results, skipping persistence");
                return;
            }
        };

        let new_items: Vec<ResultItem> = items
            .iter()
            .filter(|i| i.stable_id.map(|id| !existing.contains(&id)).unwrap_or(false))
            .cloned()
            .collect();
        if new_items.is_empty() {
            debug!(backend = %backend, "all results already known");
            return;
        }

        match self.store.insert_all(&new_items) {
            Ok(inserted) => {
                debug!(backend = %backend, inserted, known = existing.len(), "stored new results")
            }
            Err(e) => {
                warn!(backend = %backend, error = %e, "failed to store search results")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::store::SqliteResultStore;
    use crate::testing::result_item;

    #[test]
    fn test_stable_id_is_deterministic() {
        let a = stable_id("backend", "title", "link", "guid");
        let b = stable_id("backend", "title", "link", "guid");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stable_id_differs_per_field() {
        let base = stable_id("backend", "title", "link", "guid");
        assert_ne!(base, stable_id("other", "title", "link", "guid"));
        assert_ne!(base, stable_id("backend", "other", "link", "guid"));
        assert_ne!(base, stable_id("backend", "title", "other", "guid"));
        assert_ne!(base, stable_id("backend", "title", "link", "other"));
    }

    #[test]
    fn test_stable_id_field_boundaries_matter() {
        // "ab" + "c" must not collide with "a" + "bc".
        assert_ne!(
            stable_id("ab", "c", "link", "guid"),
            stable_id("a", "bc", "link", "guid")
        );
    }

    #[tokio::test]
    async fn test_persist_attaches_ids_and_stores() {
        let store = Arc::new(SqliteResultStore::in_memory().unwrap());
        let persister = ResultPersister::new(store.clone());

        let mut items = vec![result_item("nzbplanet", "a"), result_item("nzbplanet", "b")];
        persister.persist("nzbplanet", &mut items).await;

        assert!(items.iter().all(|i| i.stable_id.is_some()));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persist_is_idempotent() {
        let store = Arc::new(SqliteResultStore::in_memory().unwrap());
        let persister = ResultPersister::new(store.clone());

        let mut first = vec![result_item("nzbplanet", "a"), result_item("nzbplanet", "b")];
        persister.persist("nzbplanet", &mut first).await;

        // Second search returns one known and one new result.
        let mut second = vec![result_item("nzbplanet", "b"), result_item("nzbplanet", "c")];
        persister.persist("nzbplanet", &mut second).await;

        assert_eq!(store.count().unwrap(), 3);
        // The known item got the same id both times.
        assert_eq!(first[1].stable_id, second[0].stable_id);
    }

    #[tokio::test]
    async fn test_persist_empty_is_noop() {
        let store = Arc::new(SqliteResultStore::in_memory().unwrap());
        let persister = ResultPersister::new(store.clone());
        let mut items: Vec<ResultItem> = Vec::new();
        persister.persist("nzbplanet", &mut items).await;
        assert_eq!(store.count().unwrap(), 0);
    }
}
