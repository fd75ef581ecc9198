//! Prequeue store: id → entry map with TTL eviction, readers-writer
//! discipline via `DashMap`, per-entry mutation serialised by a
//! `tokio::sync::Mutex` wrapping each entry.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::PrequeueEntry;

const TTL_SECS: u64 = 15 * 60;

#[derive(Default)]
pub struct PrequeueStore {
    entries: DashMap<Uuid, Arc<Mutex<PrequeueEntry>>>,
}

impl PrequeueStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, entry: PrequeueEntry) -> Arc<Mutex<PrequeueEntry>> {
        let id = entry.id;
        let handle = Arc::new(Mutex::new(entry));
        self.entries.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Mutex<PrequeueEntry>>> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: Uuid) {
        self.entries.remove(&id);
    }

    /// Cancels the worker behind `id` (if still running) and drops the
    /// entry. Returns `false` if no such entry exists.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let Some(handle) = self.entries.get(&id).map(|e| e.value().clone()) else {
            return false;
        };
        handle.lock().await.request_cancel();
        self.entries.remove(&id);
        true
    }

    /// Evicts entries untouched for longer than 15 minutes, cancelling
    /// each one's worker so it stops doing work (and tears down anything
    /// it already spawned) instead of running on past the entry it was
    /// populating.
    pub async fn reap_expired(&self) -> usize {
        let mut stale = Vec::new();
        for entry in self.entries.iter() {
            let guard = entry.value().lock().await;
            if guard.idle_secs() > TTL_SECS {
                stale.push((*entry.key(), guard.cancel_token.clone()));
            }
        }
        let count = stale.len();
        for (id, token) in stale {
            token.cancel();
            self.entries.remove(&id);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    #[tokio::test]
    async fn insert_then_get_returns_the_same_entry() {
        let store = PrequeueStore::new();
        let entry = PrequeueEntry::new(
            "tmdb:movie:1".into(),
            "Film".into(),
            "u1".into(),
            None,
            MediaType::Movie,
            None,
        );
        let id = entry.id;
        store.insert(entry);
        let fetched = store.get(id).unwrap();
        assert_eq!(fetched.lock().await.id, id);
    }

    #[tokio::test]
    async fn remove_deletes_the_entry() {
        let store = PrequeueStore::new();
        let entry = PrequeueEntry::new(
            "tmdb:movie:1".into(),
            "Film".into(),
            "u1".into(),
            None,
            MediaType::Movie,
            None,
        );
        let id = entry.id;
        store.insert(entry);
        store.remove(id);
        assert!(store.get(id).is_none());
    }
}
